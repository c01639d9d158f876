//! Property reconciliation and primary selection
//!
//! When two entities merge, one becomes the primary. Its values win ties;
//! the secondary only contributes keys the primary lacks, noticeably longer
//! strings, and list items.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::knowledge::{Entity, Properties};

/// Reliability assumed when neither the document nor the entity says
pub const DEFAULT_SOURCE_RELIABILITY: f32 = 0.5;

/// A secondary string replaces the primary's only when longer by this factor
const LONGER_STRING_FACTOR: f32 = 1.5;

/// Fields whose presence counts toward completeness
const REQUIRED_FIELDS: &[&str] = &["name", "full_name", "title"];

/// How the primary entity of a merge is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Higher completeness score wins (source on ties)
    #[default]
    MostComplete,
    PreferSource,
    PreferTarget,
    /// Higher confidence wins (source on ties)
    HighestConfidence,
    /// Most recently updated wins (source on ties)
    MostRecent,
}

impl MergeStrategy {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MostComplete => "most_complete",
            Self::PreferSource => "prefer_source",
            Self::PreferTarget => "prefer_target",
            Self::HighestConfidence => "highest_confidence",
            Self::MostRecent => "most_recent",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "most_complete" => Some(Self::MostComplete),
            "prefer_source" => Some(Self::PreferSource),
            "prefer_target" => Some(Self::PreferTarget),
            "highest_confidence" => Some(Self::HighestConfidence),
            "most_recent" => Some(Self::MostRecent),
            _ => None,
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Weighted heuristic of how complete and trustworthy an entity is
///
/// `source_reliability` comes from the entity's source document when known.
pub fn completeness_score(entity: &Entity, source_reliability: f32, now: DateTime<Utc>) -> f32 {
    let property_count = entity.properties.len() as f32;
    let required = REQUIRED_FIELDS
        .iter()
        .filter(|field| {
            entity
                .properties
                .get(**field)
                .is_some_and(|v| !v.is_null() && v.as_str().is_none_or(|s| !s.trim().is_empty()))
        })
        .count() as f32;
    let verified = if entity.is_verified { 1.0 } else { 0.0 };
    let age_days = (now - entity.updated_at).num_seconds().max(0) as f32 / 86_400.0;
    let recency = (1.0 - age_days / 365.0).max(0.0);

    0.1 * property_count
        + 0.3 * required
        + 0.4 * entity.confidence
        + 0.5 * verified
        + 0.2 * source_reliability.clamp(0.0, 1.0)
        + 0.3 * recency
}

/// Which side of a pair a strategy picks as primary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primary {
    Source,
    Target,
}

/// Pick the primary of a (source, target) pair
pub fn select_primary(
    strategy: MergeStrategy,
    source: (&Entity, f32),
    target: (&Entity, f32),
    now: DateTime<Utc>,
) -> Primary {
    let (source_entity, source_reliability) = source;
    let (target_entity, target_reliability) = target;
    let source_wins = match strategy {
        MergeStrategy::PreferSource => true,
        MergeStrategy::PreferTarget => false,
        MergeStrategy::HighestConfidence => source_entity.confidence >= target_entity.confidence,
        MergeStrategy::MostRecent => source_entity.updated_at >= target_entity.updated_at,
        MergeStrategy::MostComplete => {
            completeness_score(source_entity, source_reliability, now)
                >= completeness_score(target_entity, target_reliability, now)
        }
    };
    if source_wins {
        Primary::Source
    } else {
        Primary::Target
    }
}

/// Merge two property maps key by key, favoring `primary`
pub fn merge_properties(primary: &Properties, secondary: &Properties) -> Properties {
    let mut merged = primary.clone();
    for (key, theirs) in secondary {
        let value = match primary.get(key) {
            Some(ours) => merge_values(ours, theirs),
            None => theirs.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged
}

fn merge_values(ours: &Value, theirs: &Value) -> Value {
    match (ours, theirs) {
        (Value::String(a), Value::String(b)) => {
            let (a_len, b_len) = (a.chars().count() as f32, b.chars().count() as f32);
            if b_len > LONGER_STRING_FACTOR * a_len {
                theirs.clone()
            } else {
                ours.clone()
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut items = a.clone();
            for item in b {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
            Value::Array(items)
        }
        (Value::Object(a), Value::Object(b)) => Value::Object(merge_properties(a, b)),
        _ => ours.clone(),
    }
}

/// Build the surviving entity of a merge
///
/// Keeps the primary's id and text; the secondary's surface forms become
/// aliases.
pub fn merged_entity(primary: &Entity, secondary: &Entity) -> Entity {
    let mut merged = primary.clone();
    merged.properties = merge_properties(&primary.properties, &secondary.properties);
    merged.confidence = primary.confidence.max(secondary.confidence);
    merged.is_verified = primary.is_verified || secondary.is_verified;
    if !merged.has_embedding() {
        merged.embedding = secondary.embedding.clone();
    }
    if merged.source_document_id.is_none() {
        merged.source_document_id = secondary.source_document_id.clone();
    }

    merged.add_alias(&secondary.text);
    for alias in &secondary.aliases {
        merged.add_alias(alias);
    }
    for (other, note) in &secondary.distinct_from {
        if other != &primary.id && !merged.distinct_from.contains_key(other) {
            merged.distinct_from.insert(other.clone(), note.clone());
        }
    }
    merged.distinct_from.remove(&secondary.id);
    merged.updated_at = Utc::now();
    merged
}
