//! Knowledge relationships
//!
//! Relationships are directed, typed edges between entities. Extracted data
//! may contain self-loops; the direct-edit path rejects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::Properties;

/// A directed relationship between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier for the relationship
    pub id: String,
    /// ID of the source entity
    pub source_entity_id: String,
    /// ID of the target entity
    pub target_entity_id: String,
    /// Relationship label (e.g., "EMPLOYED_BY")
    pub relationship_type: String,
    /// Extracted attributes
    #[serde(default)]
    pub properties: Properties,
    /// Extraction confidence (0.0 to 1.0)
    pub confidence: f32,
    /// False once folded into an equivalent edge or deleted
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Surviving equivalent edge after a merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    /// When the relationship was created
    pub created_at: DateTime<Utc>,
    /// When the relationship was last updated
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Relationship {
    /// Create a new relationship between two entities
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relationship_type: relationship_type.into(),
            properties: Properties::new(),
            confidence: 0.5,
            is_active: true,
            merged_into: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Whether this edge touches the given entity
    pub fn involves(&self, entity_id: &str) -> bool {
        self.source_entity_id == entity_id || self.target_entity_id == entity_id
    }

    /// Whether both endpoints are the same entity
    pub fn is_self_loop(&self) -> bool {
        self.source_entity_id == self.target_entity_id
    }

    /// Normalized type label used for comparisons
    pub fn normalized_type(&self) -> String {
        self.relationship_type.trim().to_uppercase()
    }

    /// Whether `other` is the same edge (type and both endpoints, direction kept)
    pub fn is_equivalent_to(&self, other: &Relationship) -> bool {
        self.source_entity_id == other.source_entity_id
            && self.target_entity_id == other.target_entity_id
            && self.normalized_type() == other.normalized_type()
    }

    /// Replace every endpoint equal to `from` with `to`
    pub fn redirect_endpoint(&mut self, from: &str, to: &str) {
        if self.source_entity_id == from {
            self.source_entity_id = to.to_string();
        }
        if self.target_entity_id == from {
            self.target_entity_id = to.to_string();
        }
        self.updated_at = Utc::now();
    }

    /// Deactivate, optionally pointing at the surviving equivalent edge
    pub fn deactivate(&mut self, merged_into: Option<&str>) {
        self.is_active = false;
        self.merged_into = merged_into.map(str::to_string);
        self.updated_at = Utc::now();
    }
}
