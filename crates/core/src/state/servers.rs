//! Server and application state container

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::{replace_by, ContainerStatus, SessionState, TrackedCollection};
use crate::access::{can_access, can_create, filter_accessible, Action, ResourceType};
use crate::model::{Application, Principal, Server};
use crate::repository::ServerRepository;
use crate::validation::{ApplicationForm, ServerForm};
use crate::{Error, Result};

const MEMBERSHIP_CHANNEL_CAPACITY: usize = 256;

/// A server entering or leaving a group through a server create, edit or
/// delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MembershipMove {
    pub left: Option<String>,
    pub joined: Option<String>,
}

/// Servers visible to the signed-in principal, with their applications.
pub struct ServerState {
    repo: ServerRepository,
    session: Arc<SessionState>,
    servers: TrackedCollection<Server>,
    membership_tx: broadcast::Sender<MembershipMove>,
}

impl ServerState {
    pub fn new(repo: ServerRepository, session: Arc<SessionState>) -> Self {
        let (membership_tx, _) = broadcast::channel(MEMBERSHIP_CHANNEL_CAPACITY);
        Self {
            repo,
            session,
            servers: TrackedCollection::new(),
            membership_tx,
        }
    }

    /// Group moves caused by this container's mutations.
    pub(crate) fn subscribe_membership(&self) -> broadcast::Receiver<MembershipMove> {
        self.membership_tx.subscribe()
    }

    /// Fetch every server. Failures leave an empty collection and a banner.
    pub async fn load(&self) {
        self.servers
            .load(
                self.repo.try_list(),
                "Failed to load servers. Please try again later.",
            )
            .await;
    }

    pub async fn status(&self) -> ContainerStatus {
        self.servers.status().await
    }

    /// The servers the session principal may see.
    pub async fn servers(&self) -> Vec<Server> {
        let principal = self.session.principal().await;
        filter_accessible(principal.as_ref(), self.servers.snapshot().await)
    }

    pub async fn server(&self, id: &str) -> Option<Server> {
        let principal = self.session.principal().await;
        self.servers
            .find(|server| server.id == id)
            .await
            .filter(|server| can_access(principal.as_ref(), Some(server), Action::Read))
    }

    pub async fn can_edit_server(&self, server: &Server) -> bool {
        let principal = self.session.principal().await;
        can_access(principal.as_ref(), Some(server), Action::Update)
    }

    pub async fn can_delete_server(&self, server: &Server) -> bool {
        let principal = self.session.principal().await;
        can_access(principal.as_ref(), Some(server), Action::Delete)
    }

    pub async fn add_server(&self, form: &ServerForm) -> Result<Server> {
        let input = form.validate()?;
        self.require_creator(ResourceType::Server).await?;
        let created = self
            .servers
            .run(
                "Failed to add server. Please try again later.",
                self.repo.create(&input),
                |servers, created| servers.push(created.clone()),
            )
            .await?;
        self.announce_move(None, created.group_id.clone());
        Ok(created)
    }

    /// Replace a server's fields. Its applications are kept as they are.
    pub async fn update_server(&self, id: &str, form: &ServerForm) -> Result<Server> {
        let input = form.validate_edit()?;
        let current = self.authorize(id, Action::Update).await?;
        let updated = self
            .servers
            .run(
                "Failed to update server. Please try again later.",
                self.repo.update(id, &input),
                |servers, updated| {
                    if let Some(server) = servers.iter_mut().find(|server| server.id == updated.id) {
                        let applications = std::mem::take(&mut server.applications);
                        *server = Server {
                            applications,
                            ..updated.clone()
                        };
                    }
                },
            )
            .await?;
        self.announce_move(current.group_id, updated.group_id.clone());
        Ok(Server {
            applications: current.applications,
            ..updated
        })
    }

    pub async fn delete_server(&self, id: &str) -> Result<()> {
        let current = self.authorize(id, Action::Delete).await?;
        let result = self
            .servers
            .run(
                "Failed to delete server. Please try again later.",
                self.repo.delete(id),
                |servers, _| servers.retain(|server| server.id != id),
            )
            .await;

        // Applications removed before the failure are gone remotely
        if let Err(Error::PartialFailure { completed, .. }) = &result {
            self.servers
                .patch(|servers| {
                    if let Some(server) = servers.iter_mut().find(|server| server.id == id) {
                        server.applications.retain(|app| !completed.contains(&app.id));
                    }
                })
                .await;
        }
        if result.is_ok() {
            self.announce_move(current.group_id, None);
        }
        result
    }

    pub async fn add_application(&self, server_id: &str, form: &ApplicationForm) -> Result<Application> {
        let input = form.validate()?;
        self.authorize(server_id, Action::Update).await?;
        self.servers
            .run(
                "Failed to add application. Please try again later.",
                self.repo.applications().create(server_id, &input),
                |servers, created| {
                    if let Some(server) = servers.iter_mut().find(|server| server.id == server_id) {
                        server.applications.push(created.clone());
                    }
                },
            )
            .await
    }

    pub async fn update_application(
        &self,
        server_id: &str,
        app_id: &str,
        form: &ApplicationForm,
    ) -> Result<Application> {
        let input = form.validate()?;
        self.authorize_application(server_id, app_id, Action::Update)
            .await?;
        self.servers
            .run(
                "Failed to update application. Please try again later.",
                self.repo.applications().update(app_id, &input),
                |servers, updated| {
                    if let Some(server) = servers.iter_mut().find(|server| server.id == server_id) {
                        replace_by(&mut server.applications, updated.clone(), |a, b| a.id == b.id);
                    }
                },
            )
            .await
    }

    pub async fn delete_application(&self, server_id: &str, app_id: &str) -> Result<()> {
        self.authorize_application(server_id, app_id, Action::Delete)
            .await?;
        self.servers
            .run(
                "Failed to delete application. Please try again later.",
                self.repo.applications().delete(app_id),
                |servers, _| {
                    if let Some(server) = servers.iter_mut().find(|server| server.id == server_id) {
                        server.applications.retain(|app| app.id != app_id);
                    }
                },
            )
            .await
    }

    /// Take a server returned by another container's mutation.
    pub(crate) async fn apply_server(&self, server: Server) {
        self.servers
            .patch(|servers| replace_by(servers, server, |a, b| a.id == b.id))
            .await;
    }

    /// Forget a deleted group on every local member.
    pub(crate) async fn clear_group(&self, group_id: &str) {
        self.servers
            .patch(|servers| {
                servers
                    .iter_mut()
                    .filter(|server| server.group_id.as_deref() == Some(group_id))
                    .for_each(|server| server.group_id = None);
            })
            .await;
    }

    fn announce_move(&self, left: Option<String>, joined: Option<String>) {
        if left == joined {
            return;
        }
        debug!("Server moved from group {:?} to {:?}", left, joined);
        // No receiver just means no group container is listening
        let _ = self.membership_tx.send(MembershipMove { left, joined });
    }

    /// Resolve a server and check the session principal may act on it.
    ///
    /// Uses the local copy when there is one, so a denied mutation never
    /// reaches the store.
    pub(crate) async fn authorize(&self, id: &str, action: Action) -> Result<Server> {
        let principal = self.require_principal().await?;
        let server = match self.servers.find(|server| server.id == id).await {
            Some(server) => server,
            None => match self.repo.get(id).await {
                Ok(server) => server,
                Err(err) => return Err(self.servers.reject(err).await),
            },
        };
        if can_access(Some(&principal), Some(&server), action) {
            return Ok(server);
        }
        debug!("{} denied {:?} on server {}", principal.id, action, id);
        let verb = match action {
            Action::Delete => "delete",
            Action::Read | Action::Update => "modify",
        };
        Err(self
            .servers
            .reject(Error::Forbidden(format!(
                "You do not have permission to {} this server",
                verb
            )))
            .await)
    }

    async fn authorize_application(&self, server_id: &str, app_id: &str, action: Action) -> Result<Server> {
        let server = self.authorize(server_id, action).await?;
        if server.application(app_id).is_none() {
            return Err(self
                .servers
                .reject(Error::NotFound(format!(
                    "Application {} not found on server {}",
                    app_id, server_id
                )))
                .await);
        }
        Ok(server)
    }

    async fn require_creator(&self, resource: ResourceType) -> Result<Principal> {
        let principal = self.require_principal().await?;
        if can_create(Some(&principal), resource) {
            Ok(principal)
        } else {
            Err(self
                .servers
                .reject(Error::Forbidden("You cannot create servers".to_string()))
                .await)
        }
    }

    async fn require_principal(&self) -> Result<Principal> {
        match self.session.principal().await {
            Some(principal) => Ok(principal),
            None => Err(self
                .servers
                .reject(Error::Unauthorized("Sign in to manage servers".to_string()))
                .await),
        }
    }
}
