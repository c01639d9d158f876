//! Knowledge graph domain module
//!
//! The graph the conflict engine reconciles:
//!
//! - **Entity**: a node extracted from a source document
//! - **Relationship**: a directed, typed edge between two entities
//! - **SourceDocument**: provenance for extracted records
//!
//! Entities and relationships are soft-deleted. Superseded entities keep a
//! `superseded_by` pointer, and [`KnowledgeGraphRepository::resolve_canonical_id`]
//! follows the chain to the live record.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entente_core::domain::knowledge::{Entity, Relationship};
//!
//! let acme = Entity::new("Acme Corp", "Organization").with_confidence(0.9);
//! let jane = Entity::new("Jane Doe", "Person");
//! let employed = Relationship::new(&jane.id, &acme.id, "EMPLOYED_BY");
//!
//! repository.save_entity(&acme).await?;
//! repository.save_entity(&jane).await?;
//! repository.save_relationship(&employed).await?;
//! ```

mod document;
mod entity;
mod relationship;
mod repository;
mod service;

pub use document::SourceDocument;
pub use entity::{Entity, Properties, normalize_text};
pub use relationship::Relationship;
pub use repository::{EntityQuery, KnowledgeGraphRepository, MAX_SUPERSEDE_DEPTH};
pub use service::{GraphImport, ImportSummary, KnowledgeGraphService, apply_property_updates};
