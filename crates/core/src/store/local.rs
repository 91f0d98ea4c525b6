//! In-process document store
//!
//! Keeps collections in memory and, when opened on a path, mirrors them to a
//! JSON file after every write.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{Collection, Document, DocumentData, DocumentStore, Query};
use crate::{Error, Result};

// Each collection keeps insertion order, like the remote store's default ordering
type Collections = HashMap<Collection, Vec<Document>>;

/// Document store backed by memory and an optional JSON file.
#[derive(Clone, Default)]
pub struct LocalDocumentStore {
    collections: Arc<RwLock<Collections>>,
    path: Option<PathBuf>,
}

impl LocalDocumentStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store.
    ///
    /// If the file doesn't exist, it will be created on first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let collections = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::Storage(format!("Failed to read document file: {}", e))
            })?;
            if content.trim().is_empty() {
                Collections::new()
            } else {
                let stored: BTreeMap<Collection, Vec<Document>> = serde_json::from_str(&content)
                    .map_err(|e| {
                        Error::Storage(format!("Failed to parse document file: {}", e))
                    })?;
                stored.into_iter().collect()
            }
        } else {
            Collections::new()
        };

        Ok(Self {
            collections: Arc::new(RwLock::new(collections)),
            path: Some(path),
        })
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: Collection) -> usize {
        let collections = self.collections.read().await;
        collections.get(&collection).map_or(0, Vec::len)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let collections = self.collections.read().await;
            let stored: BTreeMap<Collection, &Vec<Document>> = collections
                .iter()
                .map(|(collection, docs)| (*collection, docs))
                .collect();
            serde_json::to_string_pretty(&stored)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

fn not_found(collection: Collection, id: &str) -> Error {
    Error::NotFound(format!("Document {} not found in {}", id, collection))
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let limit = queries
            .iter()
            .filter_map(|q| match q {
                Query::Limit(n) => Some(*n),
                _ => None,
            })
            .min()
            .unwrap_or(usize::MAX);

        Ok(collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| queries.iter().all(|q| q.matches(doc)))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id))
            .cloned()
            .ok_or_else(|| not_found(collection, id))
    }

    async fn create_document(&self, collection: Collection, data: DocumentData) -> Result<Document> {
        let now = Utc::now();
        let doc = Document {
            id: Uuid::new_v4().simple().to_string(),
            created_at: Some(now),
            updated_at: Some(now),
            data,
        };
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection)
                .or_default()
                .push(doc.clone());
        }
        debug!("Created {} document {}", collection, doc.id);
        self.persist().await?;
        Ok(doc)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: DocumentData,
    ) -> Result<Document> {
        let updated = {
            let mut collections = self.collections.write().await;
            let doc = collections
                .get_mut(&collection)
                .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
                .ok_or_else(|| not_found(collection, id))?;
            doc.data.extend(data);
            doc.updated_at = Some(Utc::now());
            doc.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<()> {
        {
            let mut collections = self.collections.write().await;
            let docs = collections
                .get_mut(&collection)
                .ok_or_else(|| not_found(collection, id))?;
            let index = docs
                .iter()
                .position(|doc| doc.id == id)
                .ok_or_else(|| not_found(collection, id))?;
            docs.remove(index);
        }
        debug!("Deleted {} document {}", collection, id);
        self.persist().await
    }
}
