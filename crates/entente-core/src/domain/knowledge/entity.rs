//! Knowledge entity types
//!
//! Entities are nodes of the knowledge graph, produced by document extraction
//! and later reconciled by the conflict engine. Entities are never removed
//! while referenced; superseded ones stay in the store inactive with a
//! pointer to their replacement.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Property bag attached to entities and relationships
pub type Properties = Map<String, Value>;

/// A knowledge entity extracted from a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier for the entity
    pub id: String,
    /// Surface text as extracted (e.g., "John Smith")
    pub text: String,
    /// Free-form entity type label (e.g., "Person", "Organization")
    pub entity_type: String,
    /// Arbitrary extracted attributes
    #[serde(default)]
    pub properties: Properties,
    /// Extraction confidence (0.0 to 1.0)
    pub confidence: f32,
    /// Optional embedding of the entity text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Whether a human verified this entity
    #[serde(default)]
    pub is_verified: bool,
    /// Document this entity was extracted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document_id: Option<String>,
    /// False once superseded or merged away
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Replacement entity when inactive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// Alternative surface forms absorbed through merges
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Entities an expert declared distinct from this one (id -> note)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub distinct_from: BTreeMap<String, String>,
    /// When the entity was created
    pub created_at: DateTime<Utc>,
    /// When the entity was last updated
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Entity {
    /// Create a new active entity
    pub fn new(text: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            entity_type: entity_type.into(),
            properties: Properties::new(),
            confidence: 0.5,
            embedding: None,
            is_verified: false,
            source_document_id: None,
            is_active: true,
            superseded_by: None,
            aliases: Vec::new(),
            distinct_from: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set confidence score
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set a single property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replace the property map
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Set the embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the source document
    pub fn with_source_document(mut self, document_id: impl Into<String>) -> Self {
        self.source_document_id = Some(document_id.into());
        self
    }

    /// Mark as verified
    pub fn verified(mut self) -> Self {
        self.is_verified = true;
        self
    }

    /// Normalized text used for grouping (trimmed, lowercased)
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }

    /// Whether this entity has a usable embedding
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Soft-delete in favor of another entity
    pub fn supersede(&mut self, replacement_id: &str) {
        self.is_active = false;
        self.superseded_by = Some(replacement_id.to_string());
        self.updated_at = Utc::now();
    }

    /// Record a surface form, ignoring case-insensitive duplicates
    pub fn add_alias(&mut self, alias: &str) {
        let normalized = normalize_text(alias);
        if normalized.is_empty() || normalized == self.normalized_text() {
            return;
        }
        if !self.aliases.iter().any(|a| normalize_text(a) == normalized) {
            self.aliases.push(alias.to_string());
            self.updated_at = Utc::now();
        }
    }

    /// Record that `other_id` denotes a different real-world thing
    pub fn mark_distinct_from(&mut self, other_id: &str, note: impl Into<String>) {
        self.distinct_from.insert(other_id.to_string(), note.into());
        self.updated_at = Utc::now();
    }

    /// Whether an expert separated this entity from `other_id`
    pub fn is_distinct_from(&self, other_id: &str) -> bool {
        self.distinct_from.contains_key(other_id)
    }

    /// Reliability hint carried in properties, if any
    pub fn property_reliability(&self) -> Option<f32> {
        self.properties
            .get("source_reliability")
            .and_then(Value::as_f64)
            .map(|r| (r as f32).clamp(0.0, 1.0))
    }
}

/// Canonical grouping form of entity text
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_creation() {
        let entity = Entity::new("John Smith", "Person")
            .with_confidence(0.8)
            .with_property("age", "30");

        assert!(!entity.id.is_empty());
        assert!(entity.is_active);
        assert_eq!(entity.entity_type, "Person");
        assert_eq!(entity.confidence, 0.8);
        assert_eq!(entity.properties.get("age"), Some(&Value::from("30")));
    }

    #[test]
    fn test_confidence_clamping() {
        assert_eq!(Entity::new("x", "T").with_confidence(3.0).confidence, 1.0);
        assert_eq!(Entity::new("x", "T").with_confidence(-1.0).confidence, 0.0);
    }

    #[test]
    fn test_supersede() {
        let mut entity = Entity::new("Acme", "Organization");
        entity.supersede("other");
        assert!(!entity.is_active);
        assert_eq!(entity.superseded_by.as_deref(), Some("other"));
    }

    #[test]
    fn test_aliases_deduplicate() {
        let mut entity = Entity::new("IBM", "Organization");
        entity.add_alias("International Business Machines");
        entity.add_alias("international business machines");
        entity.add_alias("ibm");
        assert_eq!(entity.aliases, vec!["International Business Machines"]);
    }

    #[test]
    fn test_distinct_from() {
        let mut entity = Entity::new("Paris", "Location");
        entity.mark_distinct_from("paris-texas", "city in Texas");
        assert!(entity.is_distinct_from("paris-texas"));
        assert!(!entity.is_distinct_from("paris-france"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "id": "e1", "text": "Acme", "entity_type": "Organization",
            "confidence": 0.7,
            "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert!(entity.is_active);
        assert!(entity.properties.is_empty());
        assert!(entity.distinct_from.is_empty());
    }
}
