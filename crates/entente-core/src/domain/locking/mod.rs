//! Per-entity locking for graph mutations
//!
//! Resolution actions read relationships and then write them back, which is
//! a check-then-act race when two resolutions touch the same entity. Every
//! mutating action holds the locks of all entities it touches for its whole
//! duration.
//!
//! # Example
//!
//! ```ignore
//! use entente_core::domain::locking::EntityLockManager;
//!
//! let locks = EntityLockManager::new(Duration::from_secs(10));
//! let guard = locks.acquire(&["entity-a", "entity-b"]).await?;
//! // transfer relationships, supersede the loser...
//! drop(guard);
//! ```

pub mod guard;
pub mod manager;

pub use guard::EntityLockGuard;
pub use manager::EntityLockManager;
