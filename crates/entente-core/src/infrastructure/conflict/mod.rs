//! Conflict store infrastructure implementations

mod repository;

pub use repository::SqliteConflictRepository;
