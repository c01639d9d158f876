//! Conflict detection and the conflict store contract
//!
//! - [`types`]: conflict records, statuses and resolution payloads
//! - [`repository`]: persistence contract, filters and stats
//! - [`detector`]: the five concurrent detection passes
//! - [`checks`] and [`contradictions`]: the pairwise rules the passes apply

pub mod checks;
pub mod contradictions;
pub mod detector;
pub mod repository;
pub mod types;

pub use detector::{
    BatchDetectionResult, BatchItemError, BatchStats, ConflictDetector, DetectionPass,
    DetectionReport, PassError,
};
pub use repository::{ConflictFilter, ConflictPage, ConflictRepository, ConflictStats, RollbackSnapshot};
pub use types::{
    AI_SYSTEM, Conflict, ConflictKey, ConflictStatus, ConflictSubject, ConflictType, NewConflict,
    Resolution, ResolutionMethod, SYSTEM_DETECTOR, Severity,
};
