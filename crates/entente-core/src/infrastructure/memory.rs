//! In-memory implementation of both repositories
//!
//! Backs tests and embedding callers that keep the graph in process. All
//! state sits behind `tokio::sync::RwLock`s; listings sort on every call so
//! results match the SQLite store's ordering.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::conflict::{
    Conflict, ConflictFilter, ConflictKey, ConflictPage, ConflictRepository, ConflictStats,
    RollbackSnapshot,
};
use crate::domain::knowledge::{
    Entity, EntityQuery, KnowledgeGraphRepository, Relationship, SourceDocument,
};
use crate::error::Result;

/// Process-local knowledge graph and conflict store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entities: RwLock<HashMap<String, Entity>>,
    relationships: RwLock<HashMap<String, Relationship>>,
    documents: RwLock<HashMap<String, SourceDocument>>,
    conflicts: RwLock<HashMap<String, Conflict>>,
    snapshots: RwLock<Vec<RollbackSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_relationships(relationships: &mut [Relationship]) {
    relationships.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl KnowledgeGraphRepository for InMemoryStore {
    async fn save_entity(&self, entity: &Entity) -> Result<()> {
        self.entities
            .write()
            .await
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.entities.read().await.get(id).cloned())
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let entities = self.entities.read().await;
        let mut matching: Vec<Entity> = entities
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn count_entities(&self, active_only: bool) -> Result<u64> {
        let entities = self.entities.read().await;
        Ok(entities
            .values()
            .filter(|e| !active_only || e.is_active)
            .count() as u64)
    }

    async fn save_relationship(&self, relationship: &Relationship) -> Result<()> {
        self.relationships
            .write()
            .await
            .insert(relationship.id.clone(), relationship.clone());
        Ok(())
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
        Ok(self.relationships.read().await.get(id).cloned())
    }

    async fn list_relationships_for_entity(
        &self,
        entity_id: &str,
        active_only: bool,
    ) -> Result<Vec<Relationship>> {
        let relationships = self.relationships.read().await;
        let mut matching: Vec<Relationship> = relationships
            .values()
            .filter(|r| r.involves(entity_id) && (!active_only || r.is_active))
            .cloned()
            .collect();
        sort_relationships(&mut matching);
        Ok(matching)
    }

    async fn list_relationships(
        &self,
        active_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Relationship>> {
        let relationships = self.relationships.read().await;
        let mut matching: Vec<Relationship> = relationships
            .values()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect();
        sort_relationships(&mut matching);
        matching.truncate(limit.unwrap_or(usize::MAX));
        Ok(matching)
    }

    async fn count_relationships(&self, active_only: bool) -> Result<u64> {
        let relationships = self.relationships.read().await;
        Ok(relationships
            .values()
            .filter(|r| !active_only || r.is_active)
            .count() as u64)
    }

    async fn save_document(&self, document: &SourceDocument) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<SourceDocument>> {
        Ok(self.documents.read().await.get(id).cloned())
    }
}

#[async_trait]
impl ConflictRepository for InMemoryStore {
    async fn save_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.conflicts
            .write()
            .await
            .insert(conflict.id.clone(), conflict.clone());
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        Ok(self.conflicts.read().await.get(id).cloned())
    }

    async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<ConflictPage> {
        let conflicts = self.conflicts.read().await;
        let mut matching: Vec<Conflict> = conflicts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = matching.len() as u64;
        let limit = filter.page_size();
        Ok(ConflictPage {
            conflicts: matching.into_iter().skip(filter.skip).take(limit).collect(),
            total,
            limit,
            skip: filter.skip,
        })
    }

    async fn count_conflicts(&self, filter: &ConflictFilter) -> Result<u64> {
        let conflicts = self.conflicts.read().await;
        Ok(conflicts.values().filter(|c| filter.matches(c)).count() as u64)
    }

    async fn conflict_keys(&self) -> Result<HashSet<ConflictKey>> {
        let conflicts = self.conflicts.read().await;
        Ok(conflicts.values().map(Conflict::key).collect())
    }

    async fn stats(&self) -> Result<ConflictStats> {
        let conflicts = self.conflicts.read().await;
        Ok(ConflictStats::from_conflicts(conflicts.values()))
    }

    async fn save_snapshot(&self, snapshot: &RollbackSnapshot) -> Result<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn list_snapshots(&self, conflict_id: &str) -> Result<Vec<RollbackSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .iter()
            .filter(|s| s.conflict_id == conflict_id)
            .cloned()
            .collect())
    }
}
