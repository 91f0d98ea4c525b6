//! Document store interface
//!
//! The backing store is an external document database reached through a
//! generic CRUD API over named collections.

mod local;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub use local::LocalDocumentStore;

/// Attribute payload of a document.
pub type DocumentData = Map<String, Value>;

/// Collections used by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Servers,
    Applications,
    ServerGroups,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Servers, Self::Applications, Self::ServerGroups];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Servers => "servers",
            Self::Applications => "applications",
            Self::ServerGroups => "server_groups",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: store-managed metadata plus free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "$updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub data: DocumentData,
}

impl Document {
    pub fn new(id: impl Into<String>, data: DocumentData) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            data,
        }
    }

    /// Decode the attributes into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.data.get(attribute).and_then(Value::as_str)
    }
}

/// Encode a typed record as a document payload.
pub fn encode<T: Serialize>(record: &T) -> Result<DocumentData> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidInput(format!(
            "Document payload must be an object, got {}",
            other
        ))),
    }
}

/// Filter applied to a list query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Attribute equals value
    Equal { attribute: String, value: Value },
    /// Return at most this many documents
    Limit(usize),
}

impl Query {
    pub fn equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equal {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn limit(limit: usize) -> Self {
        Self::Limit(limit)
    }

    /// Whether a document passes this query's filter. Limits always pass.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Equal { attribute, value } => document.data.get(attribute) == Some(value),
            Self::Limit(_) => true,
        }
    }
}

/// Generic authenticated document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List documents matching every query
    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Document>>;

    /// Get a document by ID
    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document>;

    /// Create a document with a store-generated ID
    async fn create_document(&self, collection: Collection, data: DocumentData) -> Result<Document>;

    /// Update the given attributes of a document
    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: DocumentData,
    ) -> Result<Document>;

    /// Delete a document by ID
    async fn delete_document(&self, collection: Collection, id: &str) -> Result<()>;
}
