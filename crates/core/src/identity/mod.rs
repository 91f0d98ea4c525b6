//! Identity service interface
//!
//! Account and session operations of the external identity provider.

mod local;

use async_trait::async_trait;

use crate::model::Principal;
use crate::Result;

pub use local::{LocalIdentityService, RecoveryMail};

/// Account/session service consumed by the session container and by
/// repositories that stamp an owner on new documents.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Register a new account. Does not sign in.
    async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<Principal>;

    /// Sign in with email and password
    async fn create_session(&self, email: &str, password: &str) -> Result<Principal>;

    /// Sign out of the current session
    async fn delete_session(&self) -> Result<()>;

    /// The signed-in account, or `None` when there is no session
    async fn current_account(&self) -> Result<Option<Principal>>;

    /// Send a recovery mail whose link points at `redirect_url`
    async fn create_recovery(&self, email: &str, redirect_url: &str) -> Result<()>;

    /// Complete a recovery with the token pair from the mail link
    async fn update_recovery(&self, user_id: &str, secret: &str, password: &str) -> Result<()>;

    async fn update_name(&self, name: &str) -> Result<Principal>;

    /// Change the email; the current password is required
    async fn update_email(&self, email: &str, password: &str) -> Result<Principal>;

    /// Change the password; the current password is required
    async fn update_password(&self, new_password: &str, old_password: &str) -> Result<Principal>;
}
