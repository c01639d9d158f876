//! Entity merger
//!
//! Executes resolution actions against the knowledge graph. Every action:
//!
//! 1. locks all entities it touches, including the far end of every edge a
//!    relationship transfer will rewrite,
//! 2. checks they are still active,
//! 3. stores a rollback snapshot of the records it is about to change,
//! 4. mutates the graph and returns an audit payload.
//!
//! A failure after the snapshot leaves the graph partially changed; the
//! snapshot is the only record of the prior state.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::domain::conflict::{ConflictRepository, RollbackSnapshot};
use crate::domain::knowledge::{Entity, KnowledgeGraphRepository, Relationship};
use crate::domain::locking::{EntityLockGuard, EntityLockManager};
use crate::error::{Error, Result};

use super::properties::{
    DEFAULT_SOURCE_RELIABILITY, MergeStrategy, Primary, merge_properties, merged_entity,
    select_primary,
};
use super::transfer::{TransferSummary, transfer_relationships};

/// Action payload folded into a resolution's `resolution_data`
pub type ActionPayload = Map<String, Value>;

/// Executes merge, keep and create actions on the graph
pub struct EntityMerger {
    pub(super) knowledge: Arc<dyn KnowledgeGraphRepository>,
    pub(super) conflicts: Arc<dyn ConflictRepository>,
    pub(super) locks: Arc<EntityLockManager>,
}

impl EntityMerger {
    /// Create a new merger
    pub fn new(
        knowledge: Arc<dyn KnowledgeGraphRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        locks: Arc<EntityLockManager>,
    ) -> Self {
        Self {
            knowledge,
            conflicts,
            locks,
        }
    }

    /// Reliability of the entity's source document, then its own hint
    pub async fn source_reliability(&self, entity: &Entity) -> Result<f32> {
        if let Some(document_id) = &entity.source_document_id
            && let Some(document) = self.knowledge.get_document(document_id).await?
            && let Some(reliability) = document.reliability
        {
            return Ok(reliability);
        }
        Ok(entity
            .property_reliability()
            .unwrap_or(DEFAULT_SOURCE_RELIABILITY))
    }

    /// Lock `ids` plus every entity sharing an active edge with one of them
    ///
    /// The edge set is read before locking, so it is read again once the
    /// locks are held and the acquisition repeats if a neighbour appeared.
    pub(super) async fn lock_with_neighbours(&self, ids: &[&str]) -> Result<EntityLockGuard> {
        let mut wanted = self.neighbourhood(ids).await?;
        loop {
            let refs: Vec<&str> = wanted.iter().map(String::as_str).collect();
            let guard = self.locks.acquire(&refs).await?;

            let current = self.neighbourhood(ids).await?;
            if current.is_subset(&wanted) {
                return Ok(guard);
            }
            debug!(entities = ?ids, "Neighbourhood changed while locking, retrying");
            drop(guard);
            wanted.extend(current);
        }
    }

    async fn neighbourhood(&self, ids: &[&str]) -> Result<BTreeSet<String>> {
        let mut set: BTreeSet<String> = ids.iter().map(|id| id.to_string()).collect();
        for id in ids {
            for rel in self.knowledge.list_relationships_for_entity(id, true).await? {
                set.insert(rel.source_entity_id);
                set.insert(rel.target_entity_id);
            }
        }
        Ok(set)
    }

    /// Load entities that must all be active
    pub(super) async fn load_active(&self, ids: &[&str]) -> Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            let entity = self.knowledge.require_entity(id).await?;
            if !entity.is_active {
                return Err(Error::EntityInactive(entity.id));
            }
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Store the pre-mutation state of `entities` and their active edges
    pub(super) async fn snapshot(
        &self,
        conflict_id: &str,
        action: &str,
        entities: &[&Entity],
        extra_relationships: &[&Relationship],
    ) -> Result<String> {
        let mut seen = HashSet::new();
        let mut relationships = Vec::new();
        for entity in entities {
            for rel in self
                .knowledge
                .list_relationships_for_entity(&entity.id, true)
                .await?
            {
                if seen.insert(rel.id.clone()) {
                    relationships.push(rel);
                }
            }
        }
        for rel in extra_relationships {
            if seen.insert(rel.id.clone()) {
                relationships.push((*rel).clone());
            }
        }

        let snapshot = RollbackSnapshot::capture(
            conflict_id,
            action,
            entities.iter().map(|e| (*e).clone()).collect(),
            relationships,
        );
        self.conflicts.save_snapshot(&snapshot).await?;
        debug!(snapshot_id = %snapshot.id, conflict_id, action, "Captured rollback snapshot");
        Ok(snapshot.id)
    }

    /// Merge two entities into the primary chosen by `strategy`
    pub async fn merge_entities(
        &self,
        conflict_id: &str,
        source_id: &str,
        target_id: &str,
        strategy: MergeStrategy,
    ) -> Result<ActionPayload> {
        ensure_distinct(source_id, target_id)?;
        let _guard = self.lock_with_neighbours(&[source_id, target_id]).await?;

        let mut pair = self.load_active(&[source_id, target_id]).await?;
        let (target, source) = (pair.remove(1), pair.remove(0));

        let now = Utc::now();
        let source_reliability = self.source_reliability(&source).await?;
        let target_reliability = self.source_reliability(&target).await?;
        let (primary, secondary) = match select_primary(
            strategy,
            (&source, source_reliability),
            (&target, target_reliability),
            now,
        ) {
            Primary::Source => (source, target),
            Primary::Target => (target, source),
        };

        let snapshot_id = self
            .snapshot(conflict_id, "merge_entities", &[&primary, &secondary], &[])
            .await?;

        let merged = merged_entity(&primary, &secondary);
        self.knowledge.save_entity(&merged).await?;

        let transfer = transfer_relationships(self.knowledge.as_ref(), &secondary.id, &primary.id).await?;

        let mut retired = secondary;
        retired.supersede(&primary.id);
        self.knowledge.save_entity(&retired).await?;

        info!(
            conflict_id,
            primary = %primary.id,
            secondary = %retired.id,
            strategy = %strategy,
            moved = transfer.moved.len(),
            deduplicated = transfer.deduplicated.len(),
            "Merged entities"
        );

        let mut payload = base_payload("merge_entities", &snapshot_id);
        payload.insert("merge_strategy".into(), json!(strategy));
        payload.insert("primary_entity_id".into(), json!(primary.id));
        payload.insert("secondary_entity_id".into(), json!(retired.id));
        payload.insert("merged_properties".into(), Value::Object(merged.properties));
        insert_transfer(&mut payload, &transfer);
        Ok(payload)
    }

    /// Keep `winner_id`, superseding `loser_id`
    pub async fn keep_entity(
        &self,
        conflict_id: &str,
        action: &str,
        winner_id: &str,
        loser_id: &str,
        transfer: bool,
    ) -> Result<ActionPayload> {
        ensure_distinct(winner_id, loser_id)?;
        let _guard = if transfer {
            self.lock_with_neighbours(&[winner_id, loser_id]).await?
        } else {
            self.locks.acquire(&[winner_id, loser_id]).await?
        };

        let mut pair = self.load_active(&[winner_id, loser_id]).await?;
        let loser = pair.remove(1);
        let winner = pair.remove(0);

        let snapshot_id = self
            .snapshot(conflict_id, action, &[&winner, &loser], &[])
            .await?;

        let summary = if transfer {
            transfer_relationships(self.knowledge.as_ref(), &loser.id, &winner.id).await?
        } else {
            TransferSummary::default()
        };

        let mut retired = loser;
        retired.supersede(&winner.id);
        self.knowledge.save_entity(&retired).await?;

        info!(conflict_id, winner = %winner.id, loser = %retired.id, action, "Superseded entity");

        let mut payload = base_payload(action, &snapshot_id);
        payload.insert("kept_entity_id".into(), json!(winner.id));
        payload.insert("superseded_entity_id".into(), json!(retired.id));
        insert_transfer(&mut payload, &summary);
        Ok(payload)
    }

    /// Keep both entities and record that they are different things
    ///
    /// The detector skips pairs marked this way.
    pub async fn keep_both(
        &self,
        conflict_id: &str,
        source_id: &str,
        target_id: &str,
        note: &str,
    ) -> Result<ActionPayload> {
        ensure_distinct(source_id, target_id)?;
        let _guard = self.locks.acquire(&[source_id, target_id]).await?;

        let mut pair = self.load_active(&[source_id, target_id]).await?;
        let mut target = pair.remove(1);
        let mut source = pair.remove(0);

        let snapshot_id = self
            .snapshot(conflict_id, "keep_both", &[&source, &target], &[])
            .await?;

        source.mark_distinct_from(&target.id, note);
        target.mark_distinct_from(&source.id, note);
        self.knowledge.save_entity(&source).await?;
        self.knowledge.save_entity(&target).await?;

        info!(conflict_id, source = %source.id, target = %target.id, "Marked entities distinct");

        let mut payload = base_payload("keep_both", &snapshot_id);
        payload.insert("entity_ids".into(), json!([source.id, target.id]));
        payload.insert("disambiguation_note".into(), json!(note));
        Ok(payload)
    }

    /// Replace both entities with a fresh one built from their merged data
    pub async fn create_new(
        &self,
        conflict_id: &str,
        source_id: &str,
        target_id: &str,
        text: Option<&str>,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<ActionPayload> {
        ensure_distinct(source_id, target_id)?;
        let _guard = self.lock_with_neighbours(&[source_id, target_id]).await?;

        let mut pair = self.load_active(&[source_id, target_id]).await?;
        let target = pair.remove(1);
        let source = pair.remove(0);

        let now = Utc::now();
        let source_reliability = self.source_reliability(&source).await?;
        let target_reliability = self.source_reliability(&target).await?;
        let (primary, secondary) = match select_primary(
            MergeStrategy::MostComplete,
            (&source, source_reliability),
            (&target, target_reliability),
            now,
        ) {
            Primary::Source => (&source, &target),
            Primary::Target => (&target, &source),
        };

        let mut properties = merge_properties(&primary.properties, &secondary.properties);
        if let Some(overrides) = overrides {
            crate::domain::knowledge::apply_property_updates(&mut properties, overrides);
        }

        let mut created = Entity::new(text.unwrap_or(&primary.text), primary.entity_type.clone())
            .with_properties(properties)
            .with_confidence(primary.confidence.max(secondary.confidence));
        created.is_verified = primary.is_verified || secondary.is_verified;
        created.embedding = primary.embedding.clone().or_else(|| secondary.embedding.clone());
        created.source_document_id = primary
            .source_document_id
            .clone()
            .or_else(|| secondary.source_document_id.clone());
        created.add_alias(&primary.text);
        created.add_alias(&secondary.text);

        let snapshot_id = self
            .snapshot(conflict_id, "create_new", &[&source, &target], &[])
            .await?;

        let _new_guard = self.locks.acquire(&[created.id.as_str()]).await?;
        self.knowledge.save_entity(&created).await?;

        let mut summary =
            transfer_relationships(self.knowledge.as_ref(), &source.id, &created.id).await?;
        summary.absorb(
            transfer_relationships(self.knowledge.as_ref(), &target.id, &created.id).await?,
        );

        for original in [source, target] {
            let mut retired = original;
            retired.supersede(&created.id);
            self.knowledge.save_entity(&retired).await?;
        }

        info!(conflict_id, created = %created.id, "Created replacement entity");

        let mut payload = base_payload("create_new", &snapshot_id);
        payload.insert("new_entity_id".into(), json!(created.id));
        payload.insert("superseded_entity_ids".into(), json!([source_id, target_id]));
        insert_transfer(&mut payload, &summary);
        Ok(payload)
    }
}

fn ensure_distinct(a: &str, b: &str) -> Result<()> {
    if a == b {
        return Err(Error::InvalidInput(format!(
            "conflict pair refers to the same entity '{}'",
            a
        )));
    }
    Ok(())
}

pub(super) fn base_payload(action: &str, snapshot_id: &str) -> ActionPayload {
    let mut payload = Map::new();
    payload.insert("action".into(), json!(action));
    payload.insert("success".into(), json!(true));
    payload.insert("rollback_snapshot_id".into(), json!(snapshot_id));
    payload
}

fn insert_transfer(payload: &mut ActionPayload, summary: &TransferSummary) {
    payload.insert("relationships_moved".into(), json!(summary.moved));
    payload.insert(
        "relationships_deduplicated".into(),
        json!(
            summary
                .deduplicated
                .iter()
                .map(|(moved, survivor)| json!({"relationship_id": moved, "merged_into": survivor}))
                .collect::<Vec<_>>()
        ),
    );
}
