//! HTTP plumbing shared by the database and account endpoints

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use rack_core::config::RackConfig;
use rack_core::{Error, Result};

const PROJECT_HEADER: &str = "X-Appwrite-Project";

/// Error body returned by the API.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

/// Client for an Appwrite-compatible REST API.
#[derive(Clone)]
pub struct AppwriteClient {
    http: reqwest::Client,
    pub(crate) config: RackConfig,
}

impl AppwriteClient {
    /// Build a client with its own cookie jar.
    ///
    /// Missing configuration is logged here and reported again by each call
    /// that needs it.
    pub fn new(config: RackConfig) -> Result<Self> {
        config.log_diagnostics();
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RackConfig::from_env())
    }

    pub fn config(&self) -> &RackConfig {
        &self.config
    }

    /// Start a request to `path` (relative to the endpoint).
    pub(crate) fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let endpoint = required(&self.config.endpoint, "RACK_APPWRITE_ENDPOINT")?;
        let project = required(&self.config.project_id, "RACK_APPWRITE_PROJECT_ID")?;
        debug!("{} {}", method, path);
        Ok(self
            .http
            .request(method, format!("{}{}", endpoint, path))
            .header(PROJECT_HEADER, project))
    }

    /// Send and decode a JSON response body.
    pub(crate) async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, context: &str) -> Result<T> {
        let resp = self.execute(request, context).await?;
        resp.json()
            .await
            .map_err(|e| Error::remote(None, format!("Failed to parse {} response: {}", context, e)))
    }

    /// Send and discard the response body.
    pub(crate) async fn send_empty(&self, request: RequestBuilder, context: &str) -> Result<()> {
        self.execute(request, context).await?;
        Ok(())
    }

    async fn execute(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| Error::remote(None, format!("Failed to {}: {}", context, e)))?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body: ApiError = resp.json().await.unwrap_or_default();
        warn!(
            "Failed to {}: HTTP {} {} {}",
            context, status, body.kind, body.message
        );
        Err(map_status(status, body.message))
    }
}

pub(crate) fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::Config(format!("{} is not set", name)))
}

/// Map an HTTP failure onto the error taxonomy.
pub(crate) fn map_status(status: StatusCode, message: String) -> Error {
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    } else {
        message
    };
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
        StatusCode::FORBIDDEN => Error::Forbidden(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        StatusCode::BAD_REQUEST => Error::InvalidInput(message),
        other => Error::remote(Some(other.as_u16()), message),
    }
}
