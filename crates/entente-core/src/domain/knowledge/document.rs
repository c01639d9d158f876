//! Source documents (provenance records)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ingested file or record that entities were extracted from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Unique identifier
    pub id: String,
    /// Human-readable title or file name
    pub title: String,
    /// Kind of source (e.g., "pdf", "filing", "news")
    #[serde(default)]
    pub source_type: String,
    /// How much this source is trusted (0.0 to 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f32>,
    /// When the document was ingested
    pub created_at: DateTime<Utc>,
}

impl SourceDocument {
    /// Create a new source document
    pub fn new(title: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            source_type: source_type.into(),
            reliability: None,
            created_at: Utc::now(),
        }
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set reliability (clamped to 0.0-1.0)
    pub fn with_reliability(mut self, reliability: f32) -> Self {
        self.reliability = Some(reliability.clamp(0.0, 1.0));
        self
    }
}
