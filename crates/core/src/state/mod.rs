//! State containers
//!
//! In-memory collections shared by the views of one signed-in client. Each
//! container owns its collection plus a status (`loaded`, `in_flight`, last
//! error), patches the collection from the repository's response after every
//! successful mutation, and hands out only what the session principal may
//! access.

mod groups;
pub mod onboarding;
mod servers;
mod session;

use std::future::Future;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::error;

use crate::{Error, Result};

pub use groups::ServerGroupState;
pub use onboarding::VisitTracker;
pub use servers::ServerState;
pub use session::{
    is_public_route, route_decision, RecoveryToken, Redirect, RouteDecision, SessionState,
    SessionStatus, PUBLIC_ROUTES,
};

/// Load and mutation status of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub loaded: bool,
    pub in_flight: bool,
    pub error: Option<String>,
}

struct Tracked<T> {
    items: Vec<T>,
    status: ContainerStatus,
}

/// A collection guarded by a lock that is never held across a remote call.
pub(crate) struct TrackedCollection<T> {
    inner: RwLock<Tracked<T>>,
}

impl<T: Clone> TrackedCollection<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Tracked {
                items: Vec::new(),
                status: ContainerStatus::default(),
            }),
        }
    }

    pub(crate) async fn snapshot(&self) -> Vec<T> {
        self.inner.read().await.items.clone()
    }

    pub(crate) async fn find(&self, matches: impl Fn(&T) -> bool) -> Option<T> {
        self.inner.read().await.items.iter().find(|item| matches(item)).cloned()
    }

    pub(crate) async fn status(&self) -> ContainerStatus {
        self.inner.read().await.status.clone()
    }

    pub(crate) async fn patch(&self, apply: impl FnOnce(&mut Vec<T>)) {
        apply(&mut self.inner.write().await.items);
    }

    /// Replace the whole collection after a load.
    async fn load(&self, fetch: impl Future<Output = Result<Vec<T>>>, failure: &str) {
        self.begin().await;
        let result = fetch.await;
        let mut inner = self.inner.write().await;
        match result {
            Ok(items) => inner.items = items,
            Err(err) => {
                error!("{} ({})", failure, err);
                inner.items.clear();
                inner.status.error = Some(failure.to_string());
            }
        }
        inner.status.loaded = true;
        inner.status.in_flight = false;
    }

    /// Run one remote operation with the in-flight/error discipline and, on
    /// success, patch the collection from its result.
    async fn run<R>(
        &self,
        failure: &str,
        operation: impl Future<Output = Result<R>>,
        apply: impl FnOnce(&mut Vec<T>, &R),
    ) -> Result<R> {
        self.begin().await;
        let result = operation.await;
        let mut inner = self.inner.write().await;
        match &result {
            Ok(value) => apply(&mut inner.items, value),
            Err(err) => {
                error!("{} ({})", failure, err);
                inner.status.error = Some(failure.to_string());
            }
        }
        inner.status.in_flight = false;
        result
    }

    /// Record an error that was decided locally, without a remote call.
    async fn reject(&self, err: Error) -> Error {
        self.inner.write().await.status.error = Some(err.user_message());
        err
    }

    async fn begin(&self) {
        let mut inner = self.inner.write().await;
        inner.status.in_flight = true;
        inner.status.error = None;
    }
}

/// Replace the element with the same id, keeping its position.
fn replace_by<T>(items: &mut [T], replacement: T, same: impl Fn(&T, &T) -> bool) {
    if let Some(slot) = items.iter_mut().find(|item| same(item, &replacement)) {
        *slot = replacement;
    }
}
