//! Server repository

use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{require_principal, ApplicationRepository, LIST_LIMIT};
use crate::identity::IdentityService;
use crate::model::{non_empty, Application, Server, ServerInput};
use crate::store::{encode, Collection, Document, DocumentData, DocumentStore, Query};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerRecord {
    name: String,
    ip_address: String,
    #[serde(default)]
    dns: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

pub(crate) fn server_from_document(doc: &Document, applications: Vec<Application>) -> Result<Server> {
    let record: ServerRecord = doc.decode()?;
    Ok(Server {
        id: doc.id.clone(),
        name: record.name,
        ip_address: record.ip_address,
        dns: non_empty(record.dns),
        username: non_empty(record.username),
        group_id: non_empty(record.group_id),
        user_id: non_empty(record.user_id),
        applications,
    })
}

/// Every replaceable field; absent optionals are written as empty strings.
fn server_payload(input: &ServerInput) -> Result<DocumentData> {
    encode(&json!({
        "name": input.name,
        "ipAddress": input.ip_address,
        "dns": input.dns.clone().unwrap_or_default(),
        "username": input.username.clone().unwrap_or_default(),
        "groupId": input.group_id.clone().unwrap_or_default(),
    }))
}

/// Store access for servers and, through them, their applications.
#[derive(Clone)]
pub struct ServerRepository {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityService>,
    applications: ApplicationRepository,
}

impl ServerRepository {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityService>) -> Self {
        Self {
            applications: ApplicationRepository::new(Arc::clone(&store)),
            store,
            identity,
        }
    }

    pub fn applications(&self) -> &ApplicationRepository {
        &self.applications
    }

    /// All servers with their applications; an empty list if the query fails.
    pub async fn list(&self) -> Vec<Server> {
        self.try_list().await.unwrap_or_else(|err| {
            error!("Error fetching servers: {}", err);
            Vec::new()
        })
    }

    pub async fn try_list(&self) -> Result<Vec<Server>> {
        let docs = self
            .store
            .list_documents(Collection::Servers, &[Query::limit(LIST_LIMIT)])
            .await?;
        self.assemble(docs).await
    }

    /// Servers whose `groupId` is `group_id`, with their applications.
    pub async fn in_group(&self, group_id: &str) -> Result<Vec<Server>> {
        let docs = self
            .store
            .list_documents(
                Collection::Servers,
                &[Query::equal("groupId", group_id), Query::limit(LIST_LIMIT)],
            )
            .await?;
        self.assemble(docs).await
    }

    pub async fn get(&self, id: &str) -> Result<Server> {
        let doc = self.store.get_document(Collection::Servers, id).await?;
        let applications = self.applications.try_list_by_server(id).await?;
        server_from_document(&doc, applications)
    }

    /// Create a server owned by the signed-in principal.
    pub async fn create(&self, input: &ServerInput) -> Result<Server> {
        let principal = require_principal(self.identity.as_ref(), "a server").await?;
        let mut payload = server_payload(input)?;
        payload.insert("userId".to_string(), json!(principal.id));

        let doc = self
            .store
            .create_document(Collection::Servers, payload)
            .await?;
        info!("Created server {} for {}", doc.id, principal.id);
        server_from_document(&doc, Vec::new())
    }

    /// Replace every editable field. The owner is never rewritten.
    ///
    /// The returned server carries no applications; callers keep their own.
    pub async fn update(&self, id: &str, input: &ServerInput) -> Result<Server> {
        let doc = self
            .store
            .update_document(Collection::Servers, id, server_payload(input)?)
            .await?;
        server_from_document(&doc, Vec::new())
    }

    /// Delete every application of the server, then the server itself.
    ///
    /// Stops at the first failed application delete and leaves the server in
    /// place; the error lists the applications already removed.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let applications = self.applications.try_list_by_server(id).await?;

        let mut deleted = Vec::with_capacity(applications.len());
        for app in &applications {
            if let Err(err) = self.applications.delete(&app.id).await {
                warn!(
                    "Deleting server {} stopped at application {} ({} of {} removed): {}",
                    id,
                    app.id,
                    deleted.len(),
                    applications.len(),
                    err
                );
                return Err(Error::partial(format!("Delete server {}", id), deleted, err));
            }
            deleted.push(app.id.clone());
        }

        self.store.delete_document(Collection::Servers, id).await?;
        info!("Deleted server {} and {} application(s)", id, deleted.len());
        Ok(())
    }

    async fn assemble(&self, docs: Vec<Document>) -> Result<Vec<Server>> {
        let applications =
            join_all(docs.iter().map(|doc| self.applications.list_by_server(&doc.id))).await;
        docs.iter()
            .zip(applications)
            .map(|(doc, apps)| server_from_document(doc, apps))
            .collect()
    }
}
