//! Core library for Server Rack
//!
//! This crate contains the client-side business logic, including:
//! - Server, application and server group models
//! - Ownership-based access control
//! - Repositories over a generic document store
//! - State containers and the session

pub mod access;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod repository;
pub mod state;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
