//! `DocumentStore` over the Databases API

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use rack_core::store::{Collection, Document, DocumentData, DocumentStore, Query};
use rack_core::Result;

use crate::client::{required, AppwriteClient};

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<Document>,
}

/// Query in the API's JSON syntax.
fn query_param(query: &Query) -> String {
    let encoded = match query {
        Query::Equal { attribute, value } => json!({
            "method": "equal",
            "attribute": attribute,
            "values": [value],
        }),
        Query::Limit(limit) => json!({
            "method": "limit",
            "values": [limit],
        }),
    };
    encoded.to_string()
}

/// Drop the store's own `$`-prefixed metadata from the attributes.
fn strip_metadata(mut doc: Document) -> Document {
    doc.data.retain(|key, _| !key.starts_with('$'));
    doc
}

impl AppwriteClient {
    fn documents_path(&self, collection: Collection) -> Result<String> {
        let database = required(&self.config.database_id, "RACK_APPWRITE_DATABASE_ID")?;
        let collection_id = match collection {
            Collection::Servers => required(
                &self.config.servers_collection_id,
                "RACK_APPWRITE_SERVERS_COLLECTION_ID",
            ),
            Collection::Applications => required(
                &self.config.applications_collection_id,
                "RACK_APPWRITE_APPLICATIONS_COLLECTION_ID",
            ),
            Collection::ServerGroups => required(
                &self.config.server_groups_collection_id,
                "RACK_APPWRITE_SERVER_GROUPS_COLLECTION_ID",
            ),
        }?;
        Ok(format!(
            "/databases/{}/collections/{}/documents",
            urlencoding::encode(database),
            urlencoding::encode(collection_id)
        ))
    }

    fn document_path(&self, collection: Collection, id: &str) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.documents_path(collection)?,
            urlencoding::encode(id)
        ))
    }
}

#[async_trait]
impl DocumentStore for AppwriteClient {
    async fn list_documents(&self, collection: Collection, queries: &[Query]) -> Result<Vec<Document>> {
        let params: Vec<(&str, String)> = queries
            .iter()
            .map(|query| ("queries[]", query_param(query)))
            .collect();
        let request = self
            .request(Method::GET, &self.documents_path(collection)?)?
            .query(&params);
        let list: DocumentList = self
            .send(request, &format!("list {}", collection))
            .await?;
        Ok(list.documents.into_iter().map(strip_metadata).collect())
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Document> {
        let request = self.request(Method::GET, &self.document_path(collection, id)?)?;
        let doc = self
            .send(request, &format!("get {} document", collection))
            .await?;
        Ok(strip_metadata(doc))
    }

    async fn create_document(&self, collection: Collection, data: DocumentData) -> Result<Document> {
        let request = self
            .request(Method::POST, &self.documents_path(collection)?)?
            .json(&json!({
                "documentId": "unique()",
                "data": Value::Object(data),
            }));
        let doc = self
            .send(request, &format!("create {} document", collection))
            .await?;
        Ok(strip_metadata(doc))
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        data: DocumentData,
    ) -> Result<Document> {
        let request = self
            .request(Method::PATCH, &self.document_path(collection, id)?)?
            .json(&json!({ "data": Value::Object(data) }));
        let doc = self
            .send(request, &format!("update {} document", collection))
            .await?;
        Ok(strip_metadata(doc))
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &self.document_path(collection, id)?)?;
        self.send_empty(request, &format!("delete {} document", collection))
            .await
    }
}
