//! Server group repository
//!
//! Membership lives on the servers (`groupId`); the group document only keeps
//! a counter for compatibility with older readers. Every read derives
//! `server_count` from a live membership query.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::{require_principal, ServerRepository, LIST_LIMIT};
use crate::identity::IdentityService;
use crate::model::{non_empty, Server, ServerGroup, ServerGroupDetails, ServerGroupInput};
use crate::store::{encode, Collection, Document, DocumentStore, Query};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRecord {
    name: String,
    #[serde(default)]
    description: Option<String>,
    /// JSON object serialized as a string
    #[serde(default)]
    variables: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

fn group_from_document(doc: &Document, server_count: usize) -> Result<ServerGroup> {
    let record: GroupRecord = doc.decode()?;
    Ok(ServerGroup {
        id: doc.id.clone(),
        name: record.name,
        description: non_empty(record.description),
        variables: decode_variables(record.variables.as_deref())?,
        server_count,
        user_id: non_empty(record.user_id),
    })
}

fn decode_variables(blob: Option<&str>) -> Result<BTreeMap<String, String>> {
    match blob.map(str::trim) {
        None | Some("") => Ok(BTreeMap::new()),
        Some(blob) => Ok(serde_json::from_str(blob)?),
    }
}

fn encode_variables(variables: &BTreeMap<String, String>) -> Result<String> {
    Ok(serde_json::to_string(variables)?)
}

/// Result of moving a server into or out of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub server: Server,
    pub group_id: String,
    pub server_count: usize,
    /// Group the server moved out of, with its recount
    pub previous_group: Option<(String, usize)>,
}

#[derive(Clone)]
pub struct ServerGroupRepository {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityService>,
    servers: ServerRepository,
}

impl ServerGroupRepository {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityService>) -> Self {
        Self {
            servers: ServerRepository::new(Arc::clone(&store), Arc::clone(&identity)),
            store,
            identity,
        }
    }

    /// All groups; an empty list if the query fails.
    pub async fn list(&self) -> Vec<ServerGroup> {
        self.try_list().await.unwrap_or_else(|err| {
            error!("Error fetching server groups: {}", err);
            Vec::new()
        })
    }

    /// All groups. A group whose variables cannot be decoded is skipped.
    pub async fn try_list(&self) -> Result<Vec<ServerGroup>> {
        let docs = self
            .store
            .list_documents(Collection::ServerGroups, &[Query::limit(LIST_LIMIT)])
            .await?;
        let counts = try_join_all(docs.iter().map(|doc| self.count_members(&doc.id))).await?;

        Ok(docs
            .iter()
            .zip(counts)
            .filter_map(|(doc, count)| match group_from_document(doc, count) {
                Ok(group) => Some(group),
                Err(err) => {
                    error!("Skipping server group {}: {}", doc.id, err);
                    None
                }
            })
            .collect())
    }

    /// A group with its current members.
    pub async fn get(&self, id: &str) -> Result<ServerGroupDetails> {
        let doc = self.store.get_document(Collection::ServerGroups, id).await?;
        let servers = self.servers.in_group(id).await?;
        let group = group_from_document(&doc, servers.len())?;
        Ok(ServerGroupDetails { group, servers })
    }

    pub async fn servers_in_group(&self, group_id: &str) -> Result<Vec<Server>> {
        self.servers.in_group(group_id).await
    }

    /// Create an empty group owned by the signed-in principal.
    pub async fn create(&self, input: &ServerGroupInput) -> Result<ServerGroup> {
        let principal = require_principal(self.identity.as_ref(), "a server group").await?;
        let payload = encode(&json!({
            "name": input.name,
            "description": input.description.clone().unwrap_or_default(),
            "variables": encode_variables(&input.variables)?,
            "serverCount": 0,
            "userId": principal.id,
        }))?;

        let doc = self
            .store
            .create_document(Collection::ServerGroups, payload)
            .await?;
        info!("Created server group {} for {}", doc.id, principal.id);
        group_from_document(&doc, 0)
    }

    pub async fn update(&self, id: &str, input: &ServerGroupInput) -> Result<ServerGroup> {
        let payload = encode(&json!({
            "name": input.name,
            "description": input.description.clone().unwrap_or_default(),
            "variables": encode_variables(&input.variables)?,
        }))?;
        let doc = self
            .store
            .update_document(Collection::ServerGroups, id, payload)
            .await?;
        let count = self.count_members(id).await?;
        group_from_document(&doc, count)
    }

    /// Detach every member, then delete the group.
    ///
    /// If any step fails, members already detached are pointed back at the
    /// group and the group document is kept.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let members = self.servers.in_group(id).await?;

        let mut detached: Vec<&Server> = Vec::with_capacity(members.len());
        for server in &members {
            let mut input = server.to_input();
            input.group_id = None;
            if let Err(err) = self.servers.update(&server.id, &input).await {
                warn!(
                    "Deleting server group {} stopped at server {}: {}",
                    id, server.id, err
                );
                return Err(self.restore_members(id, &detached, err).await);
            }
            detached.push(server);
        }

        if let Err(err) = self
            .store
            .delete_document(Collection::ServerGroups, id)
            .await
        {
            warn!("Deleting server group {} failed: {}", id, err);
            return Err(self.restore_members(id, &detached, err).await);
        }
        info!("Deleted server group {} and detached {} server(s)", id, detached.len());
        Ok(())
    }

    pub async fn add_server_to_group(&self, server_id: &str, group_id: &str) -> Result<MembershipChange> {
        // The group must exist before anything points at it
        self.store
            .get_document(Collection::ServerGroups, group_id)
            .await?;
        let server = self.servers.get(server_id).await?;
        let previous_group = server.group_id.clone();

        let mut input = server.to_input();
        input.group_id = Some(group_id.to_string());
        let updated = self.servers.update(server_id, &input).await?;

        let mut previous_count = None;
        if let Some(previous) = previous_group.filter(|previous| previous != group_id) {
            match self.refresh_count(&previous).await {
                Ok(count) => previous_count = Some((previous, count)),
                Err(err) => warn!("Failed to refresh member count of group {}: {}", previous, err),
            }
        }
        let server_count = self.refresh_count(group_id).await?;
        Ok(MembershipChange {
            server: Server {
                applications: server.applications,
                ..updated
            },
            group_id: group_id.to_string(),
            server_count,
            previous_group: previous_count,
        })
    }

    pub async fn remove_server_from_group(
        &self,
        server_id: &str,
        group_id: &str,
    ) -> Result<MembershipChange> {
        let server = self.servers.get(server_id).await?;
        if server.group_id.as_deref() != Some(group_id) {
            return Err(Error::InvalidInput(format!(
                "Server {} is not a member of group {}",
                server_id, group_id
            )));
        }

        let mut input = server.to_input();
        input.group_id = None;
        let updated = self.servers.update(server_id, &input).await?;
        let server_count = self.refresh_count(group_id).await?;
        Ok(MembershipChange {
            server: Server {
                applications: server.applications,
                ..updated
            },
            group_id: group_id.to_string(),
            server_count,
            previous_group: None,
        })
    }

    async fn count_members(&self, group_id: &str) -> Result<usize> {
        let docs = self
            .store
            .list_documents(
                Collection::Servers,
                &[Query::equal("groupId", group_id), Query::limit(LIST_LIMIT)],
            )
            .await?;
        Ok(docs.len())
    }

    /// Recount members and store the count on the group document.
    async fn refresh_count(&self, group_id: &str) -> Result<usize> {
        let count = self.count_members(group_id).await?;
        self.store
            .update_document(
                Collection::ServerGroups,
                group_id,
                encode(&json!({ "serverCount": count }))?,
            )
            .await?;
        Ok(count)
    }

    async fn restore_members(&self, group_id: &str, detached: &[&Server], cause: Error) -> Error {
        for server in detached.iter().rev() {
            if let Err(err) = self.servers.update(&server.id, &server.to_input()).await {
                error!(
                    "Failed to restore server {} into group {}: {}",
                    server.id, group_id, err
                );
            }
        }
        Error::partial(
            format!("Delete server group {}", group_id),
            detached.iter().map(|server| server.id.clone()).collect(),
            cause,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentityService;
    use crate::model::ServerInput;
    use crate::testing::{sign_in, Op, RecordingStore};

    struct Fixture {
        groups: ServerGroupRepository,
        servers: ServerRepository,
        store: Arc<RecordingStore>,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(RecordingStore::new());
        let identity = Arc::new(LocalIdentityService::new());
        sign_in(&identity, "owner@example.com", &[]).await;
        Fixture {
            groups: ServerGroupRepository::new(store.clone(), identity.clone()),
            servers: ServerRepository::new(store.clone(), identity),
            store,
        }
    }

    async fn server_in(fixture: &Fixture, name: &str, group_id: Option<&str>) -> Server {
        let mut input = ServerInput::new(name, "10.0.0.1");
        input.group_id = group_id.map(str::to_string);
        fixture.servers.create(&input).await.unwrap()
    }

    #[tokio::test]
    async fn test_variables_round_trip_and_live_count() {
        let fixture = setup().await;
        let group = fixture
            .groups
            .create(&ServerGroupInput::new("prod").with_variable("env", "prod"))
            .await
            .unwrap();
        assert_eq!(group.server_count, 0);

        server_in(&fixture, "a", Some(&group.id)).await;
        server_in(&fixture, "b", Some(&group.id)).await;
        server_in(&fixture, "c", None).await;

        let details = fixture.groups.get(&group.id).await.unwrap();
        let expected: BTreeMap<String, String> =
            [("env".to_string(), "prod".to_string())].into_iter().collect();
        assert_eq!(details.group.variables, expected);
        assert_eq!(details.group.server_count, 2);
        assert_eq!(details.servers.len(), 2);

        // The stored counter was never touched, yet list agrees with get
        let listed = fixture.groups.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].server_count, 2);
    }

    #[tokio::test]
    async fn test_malformed_variables_skip_only_that_group() {
        let fixture = setup().await;
        let good = fixture.groups.create(&ServerGroupInput::new("good")).await.unwrap();
        let bad = fixture.groups.create(&ServerGroupInput::new("bad")).await.unwrap();
        fixture
            .store
            .inner()
            .update_document(
                Collection::ServerGroups,
                &bad.id,
                encode(&json!({"variables": "{not json"})).unwrap(),
            )
            .await
            .unwrap();

        let listed = fixture.groups.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, good.id);
        assert!(fixture.groups.get(&bad.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_reencodes_variables() {
        let fixture = setup().await;
        let group = fixture
            .groups
            .create(&ServerGroupInput::new("prod").with_variable("env", "prod"))
            .await
            .unwrap();
        server_in(&fixture, "a", Some(&group.id)).await;

        let updated = fixture
            .groups
            .update(
                &group.id,
                &ServerGroupInput::new("production")
                    .with_variable("env", "production")
                    .with_variable("region", "eu"),
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "production");
        assert_eq!(updated.variables.len(), 2);
        assert_eq!(updated.server_count, 1);
        assert_eq!(updated.user_id, group.user_id);
    }

    #[tokio::test]
    async fn test_delete_detaches_members_first() {
        let fixture = setup().await;
        let group = fixture.groups.create(&ServerGroupInput::new("prod")).await.unwrap();
        let a = server_in(&fixture, "a", Some(&group.id)).await;
        let b = server_in(&fixture, "b", Some(&group.id)).await;
        fixture.store.clear_calls();

        fixture.groups.delete(&group.id).await.unwrap();

        let calls = fixture.store.calls();
        let group_delete = calls
            .iter()
            .position(|call| call.op == Op::Delete && call.collection == Collection::ServerGroups)
            .unwrap();
        let server_updates: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, call)| call.op == Op::Update && call.collection == Collection::Servers)
            .map(|(index, _)| index)
            .collect();
        assert_eq!(server_updates.len(), 2);
        assert!(server_updates.iter().all(|index| *index < group_delete));

        assert_eq!(fixture.servers.get(&a.id).await.unwrap().group_id, None);
        assert_eq!(fixture.servers.get(&b.id).await.unwrap().group_id, None);
        assert!(fixture.groups.get(&group.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_restores_members_on_failure() {
        let fixture = setup().await;
        let group = fixture.groups.create(&ServerGroupInput::new("prod")).await.unwrap();
        let a = server_in(&fixture, "a", Some(&group.id)).await;
        let b = server_in(&fixture, "b", Some(&group.id)).await;
        fixture.store.fail_op(Op::Update, Collection::Servers, &b.id);

        let err = fixture.groups.delete(&group.id).await.unwrap_err();
        match err {
            Error::PartialFailure { completed, .. } => assert_eq!(completed, vec![a.id.clone()]),
            other => panic!("Expected PartialFailure, got: {:?}", other),
        }

        fixture.store.clear_failures();
        let details = fixture.groups.get(&group.id).await.unwrap();
        assert_eq!(details.group.server_count, 2);
        assert_eq!(
            fixture.servers.get(&a.id).await.unwrap().group_id.as_deref(),
            Some(group.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_membership_changes_persist_count() {
        let fixture = setup().await;
        let prod = fixture.groups.create(&ServerGroupInput::new("prod")).await.unwrap();
        let staging = fixture.groups.create(&ServerGroupInput::new("staging")).await.unwrap();
        let server = server_in(&fixture, "a", None).await;

        let change = fixture
            .groups
            .add_server_to_group(&server.id, &prod.id)
            .await
            .unwrap();
        assert_eq!(change.server_count, 1);
        assert_eq!(change.server.group_id.as_deref(), Some(prod.id.as_str()));

        let stored = fixture
            .store
            .inner()
            .get_document(Collection::ServerGroups, &prod.id)
            .await
            .unwrap();
        assert_eq!(stored.data.get("serverCount"), Some(&json!(1)));

        // Moving to another group refreshes both counters
        let change = fixture
            .groups
            .add_server_to_group(&server.id, &staging.id)
            .await
            .unwrap();
        assert_eq!(change.previous_group, Some((prod.id.clone(), 0)));
        let stored = fixture
            .store
            .inner()
            .get_document(Collection::ServerGroups, &prod.id)
            .await
            .unwrap();
        assert_eq!(stored.data.get("serverCount"), Some(&json!(0)));

        let err = fixture
            .groups
            .remove_server_from_group(&server.id, &prod.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let change = fixture
            .groups
            .remove_server_from_group(&server.id, &staging.id)
            .await
            .unwrap();
        assert_eq!(change.server_count, 0);
        assert_eq!(change.server.group_id, None);
    }

    #[tokio::test]
    async fn test_add_to_missing_group_fails_without_writes() {
        let fixture = setup().await;
        let server = server_in(&fixture, "a", None).await;
        fixture.store.clear_calls();

        let err = fixture
            .groups
            .add_server_to_group(&server.id, "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fixture.store.count_ops(Op::Update, Collection::Servers), 0);
    }
}
