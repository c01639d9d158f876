//! Entente Core Library
//!
//! Conflict detection and resolution for extracted knowledge graphs:
//! - Five concurrent detection passes (duplicates, contradictions, attribute
//!   mismatches, temporal conflicts, source conflicts)
//! - Rule, AI and expert resolution paths over a guarded status machine
//! - Entity merging with relationship transfer and rollback snapshots
//! - Quality reporting across five dimensions
//! - Storage (SQLite) and LLM integration (OpenRouter API)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::application::AppContext;
    pub use crate::config::Config;
    pub use crate::domain::conflict::{
        Conflict, ConflictDetector, ConflictFilter, ConflictRepository, ConflictStatus,
        ConflictType, ResolutionMethod, Severity,
    };
    pub use crate::domain::knowledge::{Entity, KnowledgeGraphRepository, Relationship};
    pub use crate::domain::quality::{QualityAggregator, QualityReport};
    pub use crate::domain::resolution::{ManualResolution, ResolutionEngine};
    pub use crate::error::{Error, Result};
}
