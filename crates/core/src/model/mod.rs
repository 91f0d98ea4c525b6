//! Data model
//!
//! Entities mirrored from the remote store plus the signed-in principal.

mod application;
mod group;
mod principal;
mod server;

pub use application::{Application, ApplicationInput};
pub use group::{ServerGroup, ServerGroupDetails, ServerGroupInput};
pub use principal::{Principal, ADMIN_LABEL};
pub use server::{Server, ServerInput};

/// Normalize an optional wire string: blank means absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
