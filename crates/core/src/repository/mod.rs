//! Entity repositories
//!
//! Translate between store documents and entities, and own the multi-step
//! mutations (cascading deletes, group membership bookkeeping).
//!
//! Reads of whole collections fail soft: `list` logs and returns an empty
//! collection, `try_list` propagates. Single reads and all mutations
//! propagate.

mod application;
mod group;
mod server;

pub use application::ApplicationRepository;
pub use group::{MembershipChange, ServerGroupRepository};
pub use server::ServerRepository;

use crate::identity::IdentityService;
use crate::model::Principal;
use crate::{Error, Result};

/// Upper bound on documents fetched by one list call.
pub const LIST_LIMIT: usize = 5000;

async fn require_principal(identity: &dyn IdentityService, what: &str) -> Result<Principal> {
    identity
        .current_account()
        .await?
        .ok_or_else(|| Error::Unauthorized(format!("Sign in to create {}", what)))
}
