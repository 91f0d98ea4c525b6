//! Server group state container

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::servers::MembershipMove;
use super::{replace_by, ContainerStatus, ServerState, SessionState, TrackedCollection};
use crate::access::{can_access, filter_accessible, Action};
use crate::model::{Principal, Server, ServerGroup, ServerGroupDetails};
use crate::repository::{MembershipChange, ServerGroupRepository};
use crate::validation::ServerGroupForm;
use crate::{Error, Result};

fn set_count(groups: &mut [ServerGroup], group_id: &str, server_count: usize) {
    if let Some(group) = groups.iter_mut().find(|group| group.id == group_id) {
        group.server_count = server_count;
    }
}

fn apply_move(groups: &mut [ServerGroup], change: &MembershipMove) {
    if let Some(left) = &change.left {
        if let Some(group) = groups.iter_mut().find(|group| &group.id == left) {
            group.server_count = group.server_count.saturating_sub(1);
        }
    }
    if let Some(joined) = &change.joined {
        if let Some(group) = groups.iter_mut().find(|group| &group.id == joined) {
            group.server_count += 1;
        }
    }
}

/// Server groups visible to the signed-in principal.
///
/// Membership changes are mirrored into the shared [`ServerState`] so both
/// containers agree on each server's `group_id`. Servers created, edited or
/// deleted through [`ServerState`] move the cached member counts the other
/// way.
pub struct ServerGroupState {
    repo: ServerGroupRepository,
    session: Arc<SessionState>,
    servers: Arc<ServerState>,
    groups: TrackedCollection<ServerGroup>,
    membership_rx: Mutex<broadcast::Receiver<MembershipMove>>,
}

impl ServerGroupState {
    pub fn new(repo: ServerGroupRepository, session: Arc<SessionState>, servers: Arc<ServerState>) -> Self {
        Self {
            membership_rx: Mutex::new(servers.subscribe_membership()),
            repo,
            session,
            servers,
            groups: TrackedCollection::new(),
        }
    }

    pub async fn load(&self) {
        self.sync_membership().await;
        self.groups
            .load(
                self.repo.try_list(),
                "Failed to load server groups. Please try again later.",
            )
            .await;
    }

    pub async fn status(&self) -> ContainerStatus {
        self.groups.status().await
    }

    /// Accessible groups; always empty while signed out.
    pub async fn groups(&self) -> Vec<ServerGroup> {
        self.sync_membership().await;
        let principal = self.session.principal().await;
        filter_accessible(principal.as_ref(), self.groups.snapshot().await)
    }

    pub async fn add_group(&self, form: &ServerGroupForm) -> Result<ServerGroup> {
        let input = form.validate()?;
        self.require_principal().await?;
        self.groups
            .run(
                "Failed to add server group. Please try again later.",
                self.repo.create(&input),
                |groups, created| groups.push(created.clone()),
            )
            .await
    }

    pub async fn update_group(&self, id: &str, form: &ServerGroupForm) -> Result<ServerGroup> {
        let input = form.validate()?;
        self.authorize(id, Action::Update).await?;
        self.sync_membership().await;
        self.groups
            .run(
                "Failed to update server group. Please try again later.",
                self.repo.update(id, &input),
                |groups, updated| replace_by(groups, updated.clone(), |a, b| a.id == b.id),
            )
            .await
    }

    /// Delete a group after detaching its members.
    pub async fn delete_group(&self, id: &str) -> Result<()> {
        self.authorize(id, Action::Delete).await?;
        self.groups
            .run(
                "Failed to delete server group. Please try again later.",
                self.repo.delete(id),
                |groups, _| groups.retain(|group| group.id != id),
            )
            .await?;
        self.servers.clear_group(id).await;
        Ok(())
    }

    /// Accessible members of a group.
    pub async fn servers_in_group(&self, group_id: &str) -> Result<Vec<Server>> {
        self.sync_membership().await;
        let servers = self
            .groups
            .run(
                "Failed to load servers in this group. Please try again later.",
                self.repo.servers_in_group(group_id),
                |groups, members| set_count(groups, group_id, members.len()),
            )
            .await?;
        let principal = self.session.principal().await;
        Ok(filter_accessible(principal.as_ref(), servers))
    }

    /// A group with its accessible members. The local copy of the group is
    /// refreshed from the response.
    pub async fn group_details(&self, group_id: &str) -> Result<ServerGroupDetails> {
        let principal = self.require_principal().await?;
        self.sync_membership().await;
        let details = self
            .groups
            .run(
                "Failed to load server group. Please try again later.",
                self.repo.get(group_id),
                |groups, details| replace_by(groups, details.group.clone(), |a, b| a.id == b.id),
            )
            .await?;
        if !can_access(Some(&principal), Some(&details.group), Action::Read) {
            return Err(self
                .groups
                .reject(Error::Forbidden(
                    "You do not have permission to view this server group".to_string(),
                ))
                .await);
        }
        Ok(ServerGroupDetails {
            servers: filter_accessible(Some(&principal), details.servers),
            group: details.group,
        })
    }

    /// Move each server into the group, one at a time and in order.
    ///
    /// Every server must be editable by the session principal; otherwise
    /// nothing is sent. A remote failure stops the batch and reports the
    /// servers already moved, whose changes stay applied locally.
    pub async fn add_servers_to_group(
        &self,
        group_id: &str,
        server_ids: &[&str],
    ) -> Result<Vec<MembershipChange>> {
        self.authorize(group_id, Action::Update).await?;
        for server_id in server_ids {
            if let Err(err) = self.servers.authorize(server_id, Action::Update).await {
                return Err(self.groups.reject(err).await);
            }
        }
        self.sync_membership().await;

        let mut applied: Vec<MembershipChange> = Vec::with_capacity(server_ids.len());
        let operation = async {
            for server_id in server_ids {
                match self.repo.add_server_to_group(server_id, group_id).await {
                    Ok(change) => applied.push(change),
                    Err(err) => {
                        return Err(Error::partial(
                            format!("Add servers to group {}", group_id),
                            applied.iter().map(|change| change.server.id.clone()).collect(),
                            err,
                        ))
                    }
                }
            }
            Ok(())
        };
        let result = self
            .groups
            .run(
                "Failed to add servers to group. Please try again later.",
                operation,
                |_, _| {},
            )
            .await;

        self.apply_changes(&applied).await;
        result?;
        info!("Added {} server(s) to group {}", applied.len(), group_id);
        Ok(applied)
    }

    pub async fn remove_server_from_group(&self, group_id: &str, server_id: &str) -> Result<MembershipChange> {
        self.authorize(group_id, Action::Update).await?;
        if let Err(err) = self.servers.authorize(server_id, Action::Update).await {
            return Err(self.groups.reject(err).await);
        }
        self.sync_membership().await;
        let change = self
            .groups
            .run(
                "Failed to remove server from group. Please try again later.",
                self.repo.remove_server_from_group(server_id, group_id),
                |_, _| {},
            )
            .await?;
        self.apply_changes(std::slice::from_ref(&change)).await;
        Ok(change)
    }

    async fn apply_changes(&self, changes: &[MembershipChange]) {
        for change in changes {
            self.groups
                .patch(|groups| {
                    set_count(groups, &change.group_id, change.server_count);
                    if let Some((previous, count)) = &change.previous_group {
                        set_count(groups, previous, *count);
                    }
                })
                .await;
            self.servers.apply_server(change.server.clone()).await;
        }
        debug!("Applied {} membership change(s)", changes.len());
    }

    /// Fold pending server moves into the cached counts. Runs before any
    /// live count lands so a move is never counted twice.
    async fn sync_membership(&self) {
        let mut moves = Vec::new();
        {
            let mut rx = self.membership_rx.lock().await;
            loop {
                match rx.try_recv() {
                    Ok(change) => moves.push(change),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Missed {} server membership change(s); counts may be stale", skipped);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        if moves.is_empty() {
            return;
        }
        self.groups
            .patch(|groups| moves.iter().for_each(|change| apply_move(groups, change)))
            .await;
        debug!("Applied {} server membership move(s)", moves.len());
    }

    async fn authorize(&self, id: &str, action: Action) -> Result<ServerGroup> {
        let principal = self.require_principal().await?;
        let group = match self.groups.find(|group| group.id == id).await {
            Some(group) => group,
            None => match self.repo.get(id).await {
                Ok(details) => details.group,
                Err(err) => return Err(self.groups.reject(err).await),
            },
        };
        if can_access(Some(&principal), Some(&group), action) {
            return Ok(group);
        }
        Err(self
            .groups
            .reject(Error::Forbidden(
                "You do not have permission to modify this server group".to_string(),
            ))
            .await)
    }

    async fn require_principal(&self) -> Result<Principal> {
        match self.session.principal().await {
            Some(principal) => Ok(principal),
            None => Err(self
                .groups
                .reject(Error::Unauthorized("Sign in to manage server groups".to_string()))
                .await),
        }
    }
}
