//! Knowledge graph service
//!
//! Two write paths into the graph: bulk import of extracted data, which
//! takes records as-is, and the direct-edit API used by people, which checks
//! permissions and rejects self-loops.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::access::{Permission, PermissionChecker, Role};
use crate::error::{Error, Result};

use super::document::SourceDocument;
use super::entity::{Entity, Properties};
use super::relationship::Relationship;
use super::repository::KnowledgeGraphRepository;

/// Extraction output loaded in bulk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphImport {
    #[serde(default)]
    pub documents: Vec<SourceDocument>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Counts from an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub documents: usize,
    pub entities: usize,
    pub relationships: usize,
}

/// Knowledge graph service
pub struct KnowledgeGraphService {
    repository: Arc<dyn KnowledgeGraphRepository>,
    permissions: Arc<dyn PermissionChecker>,
}

impl KnowledgeGraphService {
    /// Create a new knowledge graph service
    pub fn new(
        repository: Arc<dyn KnowledgeGraphRepository>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            repository,
            permissions,
        }
    }

    /// Load extracted documents, entities and relationships
    ///
    /// Extracted data may contain self-loops; they are stored unchanged.
    pub async fn import(&self, data: &GraphImport) -> Result<ImportSummary> {
        for document in &data.documents {
            self.repository.save_document(document).await?;
        }
        for entity in &data.entities {
            self.repository.save_entity(entity).await?;
        }
        for relationship in &data.relationships {
            self.repository.save_relationship(relationship).await?;
        }

        let summary = ImportSummary {
            documents: data.documents.len(),
            entities: data.entities.len(),
            relationships: data.relationships.len(),
        };
        info!(
            documents = summary.documents,
            entities = summary.entities,
            relationships = summary.relationships,
            "Imported extraction data"
        );
        Ok(summary)
    }

    /// Create a relationship through the direct-edit API
    ///
    /// Endpoints are resolved through supersession chains first, so an edge
    /// to a merged-away entity lands on its replacement.
    pub async fn create_relationship(
        &self,
        user_id: &str,
        source_entity_id: &str,
        target_entity_id: &str,
        relationship_type: &str,
        confidence: f32,
    ) -> Result<Relationship> {
        self.permissions
            .require_permission(user_id, Permission::EditGraph)
            .await?;

        if relationship_type.trim().is_empty() {
            return Err(Error::InvalidInput(
                "relationship type must not be empty".to_string(),
            ));
        }

        let source = self.repository.resolve_canonical_id(source_entity_id).await?;
        let target = self.repository.resolve_canonical_id(target_entity_id).await?;
        if source == target {
            return Err(Error::InvalidInput(format!(
                "relationship from '{}' to itself is not allowed",
                source
            )));
        }

        let relationship =
            Relationship::new(source, target, relationship_type.trim()).with_confidence(confidence);
        self.repository.save_relationship(&relationship).await?;

        info!(
            relationship_id = %relationship.id,
            user_id,
            "Created relationship"
        );
        Ok(relationship)
    }

    /// Apply property updates to an active entity
    ///
    /// A `null` value removes the key.
    pub async fn update_entity(
        &self,
        user_id: &str,
        entity_id: &str,
        updates: &Properties,
    ) -> Result<Entity> {
        self.permissions
            .require_permission(user_id, Permission::EditGraph)
            .await?;

        let mut entity = self.repository.require_entity(entity_id).await?;
        if !entity.is_active {
            return Err(Error::EntityInactive(entity_id.to_string()));
        }

        apply_property_updates(&mut entity.properties, updates);
        entity.updated_at = chrono::Utc::now();
        self.repository.save_entity(&entity).await?;

        debug!(entity_id, keys = updates.len(), "Updated entity properties");
        Ok(entity)
    }

    /// Mark an entity as verified by an expert
    pub async fn verify_entity(&self, user_id: &str, entity_id: &str) -> Result<Entity> {
        self.permissions
            .require_any_role(user_id, &[Role::Expert, Role::Admin], "verify entities")
            .await?;

        let mut entity = self.repository.require_entity(entity_id).await?;
        if !entity.is_active {
            return Err(Error::EntityInactive(entity_id.to_string()));
        }
        entity.is_verified = true;
        entity.updated_at = chrono::Utc::now();
        self.repository.save_entity(&entity).await?;

        info!(entity_id, user_id, "Verified entity");
        Ok(entity)
    }
}

/// Merge `updates` into `properties`; `null` deletes
pub fn apply_property_updates(properties: &mut Properties, updates: &Properties) {
    for (key, value) in updates {
        if value.is_null() {
            properties.remove(key);
        } else {
            properties.insert(key.clone(), value.clone());
        }
    }
}
