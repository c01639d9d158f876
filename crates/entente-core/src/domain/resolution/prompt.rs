//! Resolution prompt construction and response parsing
//!
//! Parsing never fails. A response is read as JSON first, then scanned for
//! method, confidence and reasoning keywords, and when neither yields a
//! usable suggestion a single low-confidence `manual_review` hand-off is
//! returned instead.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::domain::conflict::{Conflict, ResolutionMethod};
use crate::domain::knowledge::{Entity, Relationship, SourceDocument};

use super::suggestions::{ResolutionSuggestion, SuggestedMethod, SuggestionSource};

/// Most suggestions requested from a provider
pub const MAX_SUGGESTIONS: usize = 3;

/// Confidence given to suggestions recovered without one
const EXTRACTED_DEFAULT_CONFIDENCE: f32 = 0.5;

static RE_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(merge[_ ]entities|keep[_ ]both|keep[_ ]source|keep[_ ]target|create[_ ]new|delete[_ ]conflicting|temporal[_ ]ordering|source[_ ]prioritization|manual[_ ]edit|manual[_ ]review)\b",
    )
    .unwrap()
});

static RE_CONFIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)confidence\W{0,4}(\d+(?:\.\d+)?)\s*(%)?").unwrap()
});

static RE_REASONING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:reasoning|because|rationale)\W{0,4}([^\n]+)").unwrap()
});

/// Everything the prompt shows about a conflict
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub documents: Vec<SourceDocument>,
}

impl PromptContext {
    fn to_json(&self) -> Value {
        json!({
            "entities": self.entities.iter().map(entity_view).collect::<Vec<_>>(),
            "relationships": self.relationships.iter().map(relationship_view).collect::<Vec<_>>(),
            "source_documents": self.documents,
        })
    }
}

fn entity_view(entity: &Entity) -> Value {
    json!({
        "id": entity.id,
        "text": entity.text,
        "entity_type": entity.entity_type,
        "properties": entity.properties,
        "confidence": entity.confidence,
        "is_verified": entity.is_verified,
        "source_document_id": entity.source_document_id,
        "aliases": entity.aliases,
        "updated_at": entity.updated_at.to_rfc3339(),
    })
}

fn relationship_view(rel: &Relationship) -> Value {
    json!({
        "id": rel.id,
        "source_entity_id": rel.source_entity_id,
        "target_entity_id": rel.target_entity_id,
        "relationship_type": rel.relationship_type,
        "confidence": rel.confidence,
        "properties": rel.properties,
        "updated_at": rel.updated_at.to_rfc3339(),
    })
}

/// System prompt for the suggestion provider
pub fn system_prompt() -> String {
    let methods = ResolutionMethod::all()
        .iter()
        .filter(|m| **m != ResolutionMethod::AiResolution)
        .map(ResolutionMethod::as_str)
        .chain(["manual_review"])
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You resolve conflicts in a knowledge graph of entities and relationships.

Given a conflict and the records involved, propose between 1 and {max} resolutions,
best first. Use only these methods: {methods}.
Choose manual_review when the records do not support a confident decision.

Respond with JSON only, in this shape:
{{
    "suggestions": [
        {{
            "resolution_method": "merge_entities",
            "reasoning": "why this resolves the conflict",
            "confidence": 0.85,
            "actions": {{}}
        }}
    ]
}}"#,
        max = MAX_SUGGESTIONS,
        methods = methods,
    )
}

/// User prompt describing one conflict
pub fn build_user_prompt(conflict: &Conflict, context: &PromptContext) -> String {
    let context_json =
        serde_json::to_string_pretty(&context.to_json()).unwrap_or_else(|_| "{}".to_string());
    let detection_json = conflict
        .context_data
        .as_ref()
        .and_then(|c| serde_json::to_string_pretty(c).ok())
        .unwrap_or_else(|| "{}".to_string());
    let attributes_json = conflict
        .conflicting_attributes
        .as_ref()
        .and_then(|c| serde_json::to_string_pretty(c).ok())
        .unwrap_or_else(|| "{}".to_string());

    format!(
        r#"Conflict type: {conflict_type}
Severity: {severity}
Confidence: {confidence:.2}
Description: {description}

Conflicting attributes:
{attributes}

Detection context:
{detection}

Records:
{records}"#,
        conflict_type = conflict.conflict_type,
        severity = conflict.severity,
        confidence = conflict.confidence_score,
        description = conflict.description,
        attributes = attributes_json,
        detection = detection_json,
        records = context_json,
    )
}

#[derive(Debug, Deserialize)]
struct RawSuggestion {
    #[serde(alias = "method")]
    resolution_method: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    actions: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawResponse {
    Wrapped { suggestions: Vec<RawSuggestion> },
    List(Vec<RawSuggestion>),
    Single(RawSuggestion),
}

/// Parse a provider response into 1 to `max` suggestions, best first
pub fn parse_suggestions(response: &str, max: usize) -> Vec<ResolutionSuggestion> {
    let max = max.clamp(1, MAX_SUGGESTIONS);

    let mut suggestions = parse_json(response);
    if suggestions.is_empty() {
        suggestions = extract_with_patterns(response).into_iter().collect();
    }
    if suggestions.is_empty() {
        warn!("No usable suggestion in provider response, handing off to manual review");
        suggestions.push(ResolutionSuggestion::manual_review(
            "Automated analysis did not produce a usable suggestion",
        ));
    }

    suggestions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    suggestions.truncate(max);
    suggestions
}

fn parse_json(response: &str) -> Vec<ResolutionSuggestion> {
    let json_str = extract_json_from_response(response);
    let raw: Vec<RawSuggestion> = match serde_json::from_str::<RawResponse>(&json_str) {
        Ok(RawResponse::Wrapped { suggestions }) | Ok(RawResponse::List(suggestions)) => {
            suggestions
        }
        Ok(RawResponse::Single(suggestion)) => vec![suggestion],
        Err(e) => {
            debug!(error = %e, "Provider response is not suggestion JSON");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|r| {
            let Some(method) = SuggestedMethod::parse(&r.resolution_method) else {
                debug!(method = %r.resolution_method, "Skipping suggestion with unknown method");
                return None;
            };
            Some(ResolutionSuggestion {
                resolution_method: method,
                reasoning: r.reasoning,
                confidence: r
                    .confidence
                    .map(|c| normalize_confidence(c as f32))
                    .unwrap_or(EXTRACTED_DEFAULT_CONFIDENCE),
                actions: r.actions.unwrap_or_default(),
                source: SuggestionSource::Ai,
            })
        })
        .collect()
}

fn extract_with_patterns(response: &str) -> Option<ResolutionSuggestion> {
    let method = RE_METHOD
        .captures(response)
        .and_then(|c| SuggestedMethod::parse(&c[1]))?;

    let confidence = RE_CONFIDENCE
        .captures(response)
        .and_then(|c| {
            let value: f32 = c[1].parse().ok()?;
            Some(if c.get(2).is_some() { value / 100.0 } else { value })
        })
        .map(normalize_confidence)
        .unwrap_or(EXTRACTED_DEFAULT_CONFIDENCE);

    let reasoning = RE_REASONING
        .captures(response)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| "Extracted from an unstructured response".to_string());

    Some(ResolutionSuggestion {
        resolution_method: method,
        reasoning,
        confidence,
        actions: Map::new(),
        source: SuggestionSource::Extracted,
    })
}

/// Values above 1 are read as percentages
fn normalize_confidence(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let value = if value > 1.0 { value / 100.0 } else { value };
    value.clamp(0.0, 1.0)
}

/// Extract JSON from a response that might contain markdown or other text
fn extract_json_from_response(response: &str) -> String {
    // Try to find JSON in code blocks first
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim().to_string();
        }
    }

    // Try to find JSON in generic code blocks
    if let Some(start) = response.find("```") {
        let potential_start = start + 3;
        if let Some(newline) = response[potential_start..].find('\n') {
            let json_start = potential_start + newline + 1;
            if let Some(end) = response[json_start..].find("```") {
                return response[json_start..json_start + end].trim().to_string();
            }
        }
    }

    // Whichever raw JSON value opens first
    let object = response.find('{').zip(response.rfind('}'));
    let array = response.find('[').zip(response.rfind(']'));
    match (object, array) {
        (Some((os, oe)), Some((as_, ae))) if as_ < os && ae > oe => response[as_..=ae].to_string(),
        (Some((start, end)), _) if start < end => response[start..=end].to_string(),
        (None, Some((start, end))) if start < end => response[start..=end].to_string(),
        _ => response.to_string(),
    }
}
