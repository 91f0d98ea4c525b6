//! Appwrite-compatible backend for Server Rack
//!
//! [`AppwriteClient`] implements both [`DocumentStore`] and
//! [`IdentityService`] over the Appwrite REST API. The session is carried by
//! the cookie the API sets on sign-in, so one client is one signed-in user.
//!
//! [`DocumentStore`]: rack_core::store::DocumentStore
//! [`IdentityService`]: rack_core::identity::IdentityService

mod account;
mod client;
mod databases;

#[cfg(test)]
mod fake;

pub use client::AppwriteClient;
