//! Ownership-based access control
//!
//! Admins may do anything; everyone else may only touch resources they own.
//! Every function here is total: absent inputs deny, nothing panics.

use serde::{Deserialize, Serialize};

use crate::model::Principal;

/// A resource that records which principal owns it.
///
/// Only types implementing this can be passed to the evaluator. Resources
/// without an owner of their own (applications) are checked through their
/// parent.
pub trait Ownable {
    fn owner_id(&self) -> Option<&str>;
}

impl<T: Ownable + ?Sized> Ownable for &T {
    fn owner_id(&self) -> Option<&str> {
        (**self).owner_id()
    }
}

/// Action being authorized. Currently every action is decided the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Update,
    Delete,
}

/// Kind of resource being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Server,
    Application,
    ServerGroup,
}

pub fn can_access<R: Ownable + ?Sized>(
    principal: Option<&Principal>,
    resource: Option<&R>,
    _action: Action,
) -> bool {
    let (Some(principal), Some(resource)) = (principal, resource) else {
        return false;
    };
    principal.is_admin() || owned_by(principal, resource)
}

pub fn is_owner<R: Ownable + ?Sized>(principal: Option<&Principal>, resource: Option<&R>) -> bool {
    match (principal, resource) {
        (Some(principal), Some(resource)) => owned_by(principal, resource),
        _ => false,
    }
}

/// Any signed-in principal may create any resource type.
pub fn can_create(principal: Option<&Principal>, _resource_type: ResourceType) -> bool {
    principal.is_some()
}

pub fn filter_accessible<R: Ownable>(principal: Option<&Principal>, resources: Vec<R>) -> Vec<R> {
    let Some(principal) = principal else {
        return Vec::new();
    };
    if principal.is_admin() {
        return resources;
    }
    resources
        .into_iter()
        .filter(|resource| owned_by(principal, resource))
        .collect()
}

fn owned_by<R: Ownable + ?Sized>(principal: &Principal, resource: &R) -> bool {
    resource.owner_id() == Some(principal.id.as_str())
}
