//! Application model definitions

use serde::{Deserialize, Serialize};

/// A service listening on a managed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub description: Option<String>,
    pub server_id: String,
}

/// Validated fields for creating or updating an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInput {
    pub name: String,
    pub port: u16,
    pub description: Option<String>,
}

impl ApplicationInput {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            description: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
