//! Entity lock manager
//!
//! Keeps one async mutex per entity id. Multi-entity acquisition sorts the
//! ids first so two actions locking the same pair in opposite order cannot
//! deadlock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::guard::EntityLockGuard;

/// Table size above which idle entries are pruned on acquisition
const PRUNE_THRESHOLD: usize = 1024;

/// Coordinates exclusive access to entities within a process
#[derive(Debug)]
pub struct EntityLockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl EntityLockManager {
    /// Create a manager with a default acquisition timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Default acquisition timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lock every listed entity, waiting at most the default timeout overall
    pub async fn acquire(&self, entity_ids: &[&str]) -> Result<EntityLockGuard> {
        self.acquire_with_timeout(entity_ids, self.timeout).await
    }

    /// Lock every listed entity, waiting at most `timeout` overall
    ///
    /// Duplicate ids are locked once. On timeout the locks taken so far are
    /// released and `Error::LockTimeout` names the entity that was busy.
    pub async fn acquire_with_timeout(
        &self,
        entity_ids: &[&str],
        timeout: Duration,
    ) -> Result<EntityLockGuard> {
        let mut ids: Vec<String> = entity_ids.iter().map(|id| id.to_string()).collect();
        ids.sort();
        ids.dedup();

        let deadline = Instant::now() + timeout;
        let mut guards = Vec::with_capacity(ids.len());

        for id in &ids {
            let mutex = self.entry(id).await;
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    warn!(entity_id = %id, timeout_ms = timeout.as_millis() as u64, "Entity lock timed out");
                    return Err(Error::LockTimeout(id.clone()));
                }
            }
        }

        debug!(entities = ?ids, "Acquired entity locks");
        Ok(EntityLockGuard::new(ids, guards))
    }

    /// Whether the entity is currently locked
    pub async fn is_locked(&self, entity_id: &str) -> bool {
        let table = self.locks.lock().await;
        table
            .get(entity_id)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Number of entities with a lock entry
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn entry(&self, entity_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().await;
        if table.len() > PRUNE_THRESHOLD {
            table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }
        table
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for EntityLockManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let manager = EntityLockManager::new(Duration::from_millis(100));
        let guard = manager.acquire(&["b", "a", "b"]).await.unwrap();
        assert_eq!(guard.entity_ids(), &["a".to_string(), "b".to_string()]);
        assert!(manager.is_locked("a").await);

        drop(guard);
        assert!(!manager.is_locked("a").await);
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let manager = EntityLockManager::new(Duration::from_millis(50));
        let _held = manager.acquire(&["b"]).await.unwrap();

        let err = manager.acquire(&["b", "a"]).await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout(ref id) if id == "b"));
        // "a" was released when the failed acquisition unwound
        assert!(!manager.is_locked("a").await);
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let manager = Arc::new(EntityLockManager::new(Duration::from_secs(2)));
        let held = manager.acquire(&["a"]).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire(&["a"]).await.map(|g| g.covers("a")) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release();
        assert!(waiter.await.unwrap().unwrap());
    }
}
