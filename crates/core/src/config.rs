//! Environment configuration

use std::path::PathBuf;

use serde::Serialize;
use tracing::error;

pub const DEFAULT_RECOVERY_URL: &str = "http://localhost:3000/reset-password";
pub const DEFAULT_DATA_DIR: &str = ".rack-data";

/// Connection settings for the remote backend plus local paths.
///
/// Remote values are optional: a missing value is reported once by
/// [`RackConfig::log_diagnostics`] and every call that needs it fails with
/// `Error::Config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RackConfig {
    pub endpoint: Option<String>,
    pub project_id: Option<String>,
    pub database_id: Option<String>,
    pub servers_collection_id: Option<String>,
    pub applications_collection_id: Option<String>,
    pub server_groups_collection_id: Option<String>,
    pub recovery_url: String,
    pub data_dir: PathBuf,
}

impl RackConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        Self {
            endpoint: value("RACK_APPWRITE_ENDPOINT").map(|url| url.trim_end_matches('/').to_string()),
            project_id: value("RACK_APPWRITE_PROJECT_ID"),
            database_id: value("RACK_APPWRITE_DATABASE_ID"),
            servers_collection_id: value("RACK_APPWRITE_SERVERS_COLLECTION_ID"),
            applications_collection_id: value("RACK_APPWRITE_APPLICATIONS_COLLECTION_ID"),
            server_groups_collection_id: value("RACK_APPWRITE_SERVER_GROUPS_COLLECTION_ID"),
            recovery_url: value("RACK_RECOVERY_URL")
                .unwrap_or_else(|| DEFAULT_RECOVERY_URL.to_string()),
            data_dir: value("RACK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        }
    }

    /// Names of the environment variables with no usable value.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("RACK_APPWRITE_ENDPOINT", &self.endpoint),
            ("RACK_APPWRITE_PROJECT_ID", &self.project_id),
            ("RACK_APPWRITE_DATABASE_ID", &self.database_id),
            ("RACK_APPWRITE_SERVERS_COLLECTION_ID", &self.servers_collection_id),
            ("RACK_APPWRITE_APPLICATIONS_COLLECTION_ID", &self.applications_collection_id),
            ("RACK_APPWRITE_SERVER_GROUPS_COLLECTION_ID", &self.server_groups_collection_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn log_diagnostics(&self) {
        for name in self.missing() {
            error!("{} is not set; remote calls that need it will fail", name);
        }
    }

    /// Path of the onboarding flag file.
    pub fn visit_flag_path(&self) -> PathBuf {
        self.data_dir.join("visited.json")
    }
}
