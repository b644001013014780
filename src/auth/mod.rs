//! # Authorization
//!
//! Write permission is asked of an explicit [`PermissionOracle`] carried by
//! the [`Caller`] of every operation. There is no global "authorization
//! off" switch: privileged work uses a caller holding [`Unrestricted`].

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::EntityId;

/// Identity of whoever performs an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Policy decision point for writes on entities.
pub trait PermissionOracle: Send + Sync {
    fn can_write(&self, user: &UserId, entity: EntityId) -> bool;
}

/// Grants every write. The explicit bypass for system tasks and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl PermissionOracle for Unrestricted {
    fn can_write(&self, _user: &UserId, _entity: EntityId) -> bool {
        true
    }
}

/// Explicit per-entity write grants plus administrators.
#[derive(Debug, Default)]
pub struct AccessList {
    grants: RwLock<HashSet<(UserId, EntityId)>>,
    admins: RwLock<HashSet<UserId>>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_write(&self, user: impl Into<UserId>, entity: EntityId) {
        self.grants.write().insert((user.into(), entity));
    }

    pub fn revoke_write(&self, user: impl Into<UserId>, entity: EntityId) {
        self.grants.write().remove(&(user.into(), entity));
    }

    pub fn add_admin(&self, user: impl Into<UserId>) {
        self.admins.write().insert(user.into());
    }
}

impl PermissionOracle for AccessList {
    fn can_write(&self, user: &UserId, entity: EntityId) -> bool {
        self.admins.read().contains(user) || self.grants.read().contains(&(user.clone(), entity))
    }
}

/// The user performing an operation and the oracle that judges them.
#[derive(Clone)]
pub struct Caller {
    pub user: UserId,
    oracle: Arc<dyn PermissionOracle>,
}

impl Caller {
    pub fn new(user: impl Into<UserId>, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self { user: user.into(), oracle }
    }

    /// A caller allowed to write everything.
    pub fn system() -> Self {
        Self::new("system", Arc::new(Unrestricted))
    }

    pub fn can_write(&self, entity: EntityId) -> bool {
        self.oracle.can_write(&self.user, entity)
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller").field("user", &self.user).finish_non_exhaustive()
    }
}

/// Who may move one end of an existing relationship to another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepointPolicy {
    /// Write on the unmoved endpoint, or on both the old and the new entity
    /// of the moved side.
    #[default]
    UnmovedOrMovedEnds,
    /// Write on the new entity only.
    NewEndpoint,
    /// Write on the unmoved endpoint, the old entity and the new entity.
    AllEndpoints,
}

impl RepointPolicy {
    pub fn permits(self, caller: &Caller, unmoved: EntityId, old: EntityId, new: EntityId) -> bool {
        match self {
            RepointPolicy::UnmovedOrMovedEnds => {
                caller.can_write(unmoved) || (caller.can_write(old) && caller.can_write(new))
            }
            RepointPolicy::NewEndpoint => caller.can_write(new),
            RepointPolicy::AllEndpoints => {
                caller.can_write(unmoved) && caller.can_write(old) && caller.can_write(new)
            }
        }
    }
}
