//! Repository trait for knowledge graph persistence
//!
//! This module defines the storage contract the conflict engine relies on.
//! The trait abstracts over different storage backends (in-memory, SQLite).

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::document::SourceDocument;
use super::entity::Entity;
use super::relationship::Relationship;

/// Maximum supersession hops followed before a chain is considered broken
pub const MAX_SUPERSEDE_DEPTH: usize = 64;

/// Repository trait for knowledge graph persistence
///
/// Provides CRUD operations for entities, relationships and source documents.
/// Entities and relationships are soft-deleted; implementations never drop
/// rows the conflict engine marks inactive.
#[async_trait]
pub trait KnowledgeGraphRepository: Send + Sync {
    // ========== Entity Operations ==========

    /// Save an entity (insert or update)
    async fn save_entity(&self, entity: &Entity) -> Result<()>;

    /// Get an entity by ID
    async fn get_entity(&self, id: &str) -> Result<Option<Entity>>;

    /// List entities matching a query, ordered by creation time then id
    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>>;

    /// Count entities
    async fn count_entities(&self, active_only: bool) -> Result<u64>;

    // ========== Relationship Operations ==========

    /// Save a relationship (insert or update)
    async fn save_relationship(&self, relationship: &Relationship) -> Result<()>;

    /// Get a relationship by ID
    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>>;

    /// List relationships where the entity is source or target
    async fn list_relationships_for_entity(
        &self,
        entity_id: &str,
        active_only: bool,
    ) -> Result<Vec<Relationship>>;

    /// List relationships, optionally bounded
    async fn list_relationships(
        &self,
        active_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Relationship>>;

    /// Count relationships
    async fn count_relationships(&self, active_only: bool) -> Result<u64>;

    // ========== Source Documents ==========

    /// Save a source document (insert or update)
    async fn save_document(&self, document: &SourceDocument) -> Result<()>;

    /// Get a source document by ID
    async fn get_document(&self, id: &str) -> Result<Option<SourceDocument>>;

    // ========== Provided helpers ==========

    /// Get an entity or fail with `EntityNotFound`
    async fn require_entity(&self, id: &str) -> Result<Entity> {
        self.get_entity(id)
            .await?
            .ok_or_else(|| Error::EntityNotFound(id.to_string()))
    }

    /// Get a relationship or fail with `RelationshipNotFound`
    async fn require_relationship(&self, id: &str) -> Result<Relationship> {
        self.get_relationship(id)
            .await?
            .ok_or_else(|| Error::RelationshipNotFound(id.to_string()))
    }

    /// Follow the `superseded_by` chain to the live entity
    ///
    /// Returns the id itself when the entity is active. Cycles and chains
    /// longer than [`MAX_SUPERSEDE_DEPTH`] are reported as storage errors.
    async fn resolve_canonical_id(&self, id: &str) -> Result<String> {
        let mut current = id.to_string();
        let mut visited = HashSet::new();

        for _ in 0..MAX_SUPERSEDE_DEPTH {
            if !visited.insert(current.clone()) {
                return Err(Error::StorageError(format!(
                    "supersession cycle detected at entity '{}'",
                    current
                )));
            }

            let entity = self.require_entity(&current).await?;
            match entity.superseded_by {
                Some(next) if !entity.is_active => current = next,
                _ => return Ok(current),
            }
        }

        Err(Error::StorageError(format!(
            "supersession chain from '{}' exceeds {} hops",
            id, MAX_SUPERSEDE_DEPTH
        )))
    }
}

/// Filter for entity listings
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    /// Restrict to these ids
    pub ids: Option<Vec<String>>,
    /// Restrict to one entity type
    pub entity_type: Option<String>,
    /// Skip inactive entities
    pub active_only: bool,
    /// Rows to skip
    pub offset: usize,
    /// Maximum rows to return
    pub limit: Option<usize>,
}

impl EntityQuery {
    /// Query for active entities only
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    /// Restrict to a set of ids
    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Restrict to a type
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Bound the result size
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether an entity satisfies the non-paging part of the filter
    pub fn matches(&self, entity: &Entity) -> bool {
        if self.active_only && !entity.is_active {
            return false;
        }
        if let Some(entity_type) = &self.entity_type
            && &entity.entity_type != entity_type
        {
            return false;
        }
        match &self.ids {
            Some(ids) => ids.iter().any(|id| id == &entity.id),
            None => true,
        }
    }
}
