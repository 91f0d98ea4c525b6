//! Server group model definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Server;
use crate::access::Ownable;

/// A named grouping of servers with free-form variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerGroup {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Number of member servers, derived from a live membership query.
    pub server_count: usize,
    pub user_id: Option<String>,
}

impl Ownable for ServerGroup {
    fn owner_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// A group together with its current members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerGroupDetails {
    pub group: ServerGroup,
    pub servers: Vec<Server>,
}

/// Validated fields for creating or updating a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerGroupInput {
    pub name: String,
    pub description: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl ServerGroupInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}
