//! Relationship-level actions and manual edits

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::domain::knowledge::{Relationship, apply_property_updates};
use crate::error::{Error, Result};

use super::merger::{ActionPayload, EntityMerger, base_payload};

impl EntityMerger {
    /// Deactivate `loser_id`, keeping `winner_id`
    pub async fn deactivate_relationship(
        &self,
        conflict_id: &str,
        action: &str,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<ActionPayload> {
        let winner = self.knowledge.require_relationship(winner_id).await?;
        let loser = self.knowledge.require_relationship(loser_id).await?;
        let endpoints = endpoints(&[&winner, &loser]);
        let _guard = self.locks.acquire(&endpoints).await?;

        // Re-read under the lock
        let mut loser = self.knowledge.require_relationship(loser_id).await?;
        if !loser.is_active {
            return Err(Error::InvalidInput(format!(
                "relationship '{}' is already inactive",
                loser_id
            )));
        }

        let snapshot_id = self
            .snapshot(conflict_id, action, &[], &[&winner, &loser])
            .await?;

        loser.deactivate(None);
        self.knowledge.save_relationship(&loser).await?;

        info!(conflict_id, kept = winner_id, deactivated = loser_id, action, "Deactivated relationship");

        let mut payload = base_payload(action, &snapshot_id);
        payload.insert("kept_relationship_id".into(), json!(winner_id));
        payload.insert("deactivated_relationship_id".into(), json!(loser_id));
        Ok(payload)
    }

    /// Apply expert-supplied entity updates
    ///
    /// `updates` maps entity id to an object with any of `text`,
    /// `entity_type`, `confidence`, `is_verified` and `properties` (where a
    /// `null` value deletes the key). Only ids in `allowed` may be edited.
    pub async fn apply_entity_updates(
        &self,
        conflict_id: &str,
        allowed: &[&str],
        updates: &Map<String, Value>,
    ) -> Result<ActionPayload> {
        if updates.is_empty() {
            return Err(Error::InvalidInput("entity_updates is empty".to_string()));
        }
        for id in updates.keys() {
            if !allowed.contains(&id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "entity '{}' is not part of this conflict",
                    id
                )));
            }
        }

        let ids: Vec<&str> = updates.keys().map(String::as_str).collect();
        let _guard = self.locks.acquire(&ids).await?;
        let mut entities = self.load_active(&ids).await?;

        let snapshot_id = self
            .snapshot(
                conflict_id,
                "manual_edit",
                &entities.iter().collect::<Vec<_>>(),
                &[],
            )
            .await?;

        for entity in &mut entities {
            let Some(update) = updates.get(&entity.id).and_then(Value::as_object) else {
                return Err(Error::InvalidInput(format!(
                    "update for entity '{}' must be an object",
                    entity.id
                )));
            };
            if let Some(text) = update.get("text").and_then(Value::as_str) {
                entity.text = text.to_string();
            }
            if let Some(entity_type) = update.get("entity_type").and_then(Value::as_str) {
                entity.entity_type = entity_type.to_string();
            }
            if let Some(confidence) = update.get("confidence").and_then(Value::as_f64) {
                entity.confidence = (confidence as f32).clamp(0.0, 1.0);
            }
            if let Some(verified) = update.get("is_verified").and_then(Value::as_bool) {
                entity.is_verified = verified;
            }
            if let Some(properties) = update.get("properties").and_then(Value::as_object) {
                apply_property_updates(&mut entity.properties, properties);
            }
            entity.updated_at = Utc::now();
            self.knowledge.save_entity(entity).await?;
        }

        info!(conflict_id, entities = entities.len(), "Applied manual entity edits");

        let mut payload = base_payload("manual_edit", &snapshot_id);
        payload.insert("updated_entity_ids".into(), json!(ids));
        Ok(payload)
    }

    /// Apply expert-supplied relationship updates
    ///
    /// `updates` maps relationship id to an object with any of
    /// `relationship_type`, `confidence`, `is_active` and `properties`.
    pub async fn apply_relationship_updates(
        &self,
        conflict_id: &str,
        allowed: &[&str],
        updates: &Map<String, Value>,
    ) -> Result<ActionPayload> {
        if updates.is_empty() {
            return Err(Error::InvalidInput(
                "relationship_updates is empty".to_string(),
            ));
        }

        let mut relationships = Vec::with_capacity(updates.len());
        for id in updates.keys() {
            if !allowed.contains(&id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "relationship '{}' is not part of this conflict",
                    id
                )));
            }
            relationships.push(self.knowledge.require_relationship(id).await?);
        }

        let locked = endpoints(&relationships.iter().collect::<Vec<_>>());
        let _guard = self.locks.acquire(&locked).await?;

        let snapshot_id = self
            .snapshot(
                conflict_id,
                "manual_edit",
                &[],
                &relationships.iter().collect::<Vec<_>>(),
            )
            .await?;

        for rel in &mut relationships {
            let Some(update) = updates.get(&rel.id).and_then(Value::as_object) else {
                return Err(Error::InvalidInput(format!(
                    "update for relationship '{}' must be an object",
                    rel.id
                )));
            };
            if let Some(rel_type) = update.get("relationship_type").and_then(Value::as_str) {
                rel.relationship_type = rel_type.to_string();
            }
            if let Some(confidence) = update.get("confidence").and_then(Value::as_f64) {
                rel.confidence = (confidence as f32).clamp(0.0, 1.0);
            }
            if let Some(properties) = update.get("properties").and_then(Value::as_object) {
                apply_property_updates(&mut rel.properties, properties);
            }
            match update.get("is_active").and_then(Value::as_bool) {
                Some(false) => rel.deactivate(None),
                Some(true) => rel.is_active = true,
                None => {}
            }
            rel.updated_at = Utc::now();
            self.knowledge.save_relationship(rel).await?;
        }

        info!(conflict_id, relationships = relationships.len(), "Applied manual relationship edits");

        let mut payload = base_payload("manual_edit", &snapshot_id);
        payload.insert(
            "updated_relationship_ids".into(),
            json!(relationships.iter().map(|r| r.id.as_str()).collect::<Vec<_>>()),
        );
        Ok(payload)
    }
}

fn endpoints<'a>(relationships: &[&'a Relationship]) -> Vec<&'a str> {
    relationships
        .iter()
        .flat_map(|r| [r.source_entity_id.as_str(), r.target_entity_id.as_str()])
        .collect()
}
