//! Signed-in principal

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Label that grants unrestricted access.
pub const ADMIN_LABEL: &str = "admin";

/// An authenticated account as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "$id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Role markers; only changed out-of-band by a privileged process.
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            labels: BTreeSet::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn is_admin(&self) -> bool {
        self.has_label(ADMIN_LABEL)
    }
}
