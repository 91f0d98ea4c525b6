//! Application repository

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use super::LIST_LIMIT;
use crate::model::{non_empty, Application, ApplicationInput};
use crate::store::{encode, Collection, Document, DocumentStore, Query};
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationRecord {
    name: String,
    port: u16,
    #[serde(default)]
    description: Option<String>,
    server_id: String,
}

fn application_from_document(doc: &Document) -> Result<Application> {
    let record: ApplicationRecord = doc.decode()?;
    Ok(Application {
        id: doc.id.clone(),
        name: record.name,
        port: record.port,
        description: non_empty(record.description),
        server_id: record.server_id,
    })
}

/// Store access for applications. Every application belongs to one server.
#[derive(Clone)]
pub struct ApplicationRepository {
    store: Arc<dyn DocumentStore>,
}

impl ApplicationRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Applications of a server; an empty list if the query fails.
    pub async fn list_by_server(&self, server_id: &str) -> Vec<Application> {
        self.try_list_by_server(server_id)
            .await
            .unwrap_or_else(|err| {
                error!("Error fetching applications for server {}: {}", server_id, err);
                Vec::new()
            })
    }

    pub async fn try_list_by_server(&self, server_id: &str) -> Result<Vec<Application>> {
        let docs = self
            .store
            .list_documents(
                Collection::Applications,
                &[Query::equal("serverId", server_id), Query::limit(LIST_LIMIT)],
            )
            .await?;
        docs.iter().map(application_from_document).collect()
    }

    /// Create an application on `server_id`.
    pub async fn create(&self, server_id: &str, input: &ApplicationInput) -> Result<Application> {
        let payload = encode(&json!({
            "name": input.name,
            "port": input.port,
            "description": input.description.clone().unwrap_or_default(),
            "serverId": server_id,
        }))?;
        let doc = self
            .store
            .create_document(Collection::Applications, payload)
            .await?;
        debug!("Created application {} on server {}", doc.id, server_id);
        application_from_document(&doc)
    }

    /// Replace name, port and description. The owning server never changes.
    pub async fn update(&self, id: &str, input: &ApplicationInput) -> Result<Application> {
        let payload = encode(&json!({
            "name": input.name,
            "port": input.port,
            "description": input.description.clone().unwrap_or_default(),
        }))?;
        let doc = self
            .store
            .update_document(Collection::Applications, id, payload)
            .await?;
        application_from_document(&doc)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store
            .delete_document(Collection::Applications, id)
            .await?;
        debug!("Deleted application {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalDocumentStore;
    use crate::testing::RecordingStore;

    fn repo() -> (ApplicationRepository, Arc<LocalDocumentStore>) {
        let store = Arc::new(LocalDocumentStore::in_memory());
        (ApplicationRepository::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_uses_argument_server_id() {
        let (repo, _) = repo();
        let app = repo
            .create("s1", &ApplicationInput::new("nginx", 80).with_description("frontend"))
            .await
            .unwrap();

        assert_eq!(app.server_id, "s1");
        assert_eq!(app.port, 80);
        assert_eq!(app.description.as_deref(), Some("frontend"));
        assert_eq!(repo.list_by_server("s1").await, vec![app]);
        assert!(repo.list_by_server("s2").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_server_id() {
        let (repo, _) = repo();
        let app = repo
            .create("s1", &ApplicationInput::new("nginx", 80).with_description("frontend"))
            .await
            .unwrap();

        let updated = repo
            .update(&app.id, &ApplicationInput::new("caddy", 443))
            .await
            .unwrap();
        assert_eq!(updated.name, "caddy");
        assert_eq!(updated.port, 443);
        assert_eq!(updated.description, None);
        assert_eq!(updated.server_id, "s1");
    }

    #[tokio::test]
    async fn test_delete_missing_application_fails() {
        let (repo, _) = repo();
        assert!(repo.delete("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_fails_soft() {
        let store = Arc::new(RecordingStore::new());
        store.fail_lists(Collection::Applications);
        let repo = ApplicationRepository::new(store.clone());

        assert!(repo.list_by_server("s1").await.is_empty());
        assert!(repo.try_list_by_server("s1").await.is_err());
    }
}
