//! Lock guards for RAII-style lock management
//!
//! Guards release their locks when dropped, so an action that fails or
//! returns early never leaves an entity locked.

use std::fmt;

use tokio::sync::OwnedMutexGuard;

/// Holds the locks of every entity touched by one action
pub struct EntityLockGuard {
    entity_ids: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl EntityLockGuard {
    pub(crate) fn new(entity_ids: Vec<String>, guards: Vec<OwnedMutexGuard<()>>) -> Self {
        Self {
            entity_ids,
            _guards: guards,
        }
    }

    /// Locked entity ids, in acquisition order
    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    /// Whether this guard covers the entity
    pub fn covers(&self, entity_id: &str) -> bool {
        self.entity_ids.iter().any(|id| id == entity_id)
    }

    /// Release explicitly (normally done on drop)
    pub fn release(self) {}
}

impl fmt::Debug for EntityLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLockGuard")
            .field("entity_ids", &self.entity_ids)
            .finish()
    }
}

impl fmt::Display for EntityLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityLock[{}]", self.entity_ids.join(","))
    }
}
