//! Server model definitions

use serde::{Deserialize, Serialize};

use super::Application;
use crate::access::Ownable;

/// A managed server and the applications it hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub dns: Option<String>,
    pub username: Option<String>,
    pub group_id: Option<String>,
    /// Creator of the server
    pub user_id: Option<String>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

impl Server {
    /// Fields of this server as an update payload.
    pub fn to_input(&self) -> ServerInput {
        ServerInput {
            name: self.name.clone(),
            ip_address: self.ip_address.clone(),
            dns: self.dns.clone(),
            username: self.username.clone(),
            group_id: self.group_id.clone(),
        }
    }

    pub fn application(&self, app_id: &str) -> Option<&Application> {
        self.applications.iter().find(|app| app.id == app_id)
    }
}

impl Ownable for Server {
    fn owner_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Validated fields for creating or replacing a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInput {
    pub name: String,
    pub ip_address: String,
    pub dns: Option<String>,
    pub username: Option<String>,
    pub group_id: Option<String>,
}

impl ServerInput {
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
            dns: None,
            username: None,
            group_id: None,
        }
    }

    /// Set the DNS name
    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns = Some(dns.into());
        self
    }

    /// Set the SSH username
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the group
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}
