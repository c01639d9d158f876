//! Pairwise entity checks used by the detector
//!
//! Each check looks at one pair of entities of the same type and either
//! produces an unpersisted conflict or nothing. They hold no state, so the
//! full-scan and per-entity batch paths share them.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value, json};

use crate::domain::knowledge::Entity;
use crate::domain::similarity::{
    cosine_similarity, exact_text_match, property_similarity, stringify_value, text_similarity,
};

use super::types::{ConflictSubject, ConflictType, NewConflict, Severity};

/// Values whose fuzzy similarity is at least this are not a mismatch
pub const ATTRIBUTE_MATCH_THRESHOLD: f32 = 0.8;

/// Keys whose disagreement means the two records cannot be the same thing
const IDENTITY_KEYS: &[&str] = &[
    "id",
    "identifier",
    "tax_id",
    "lei",
    "isin",
    "registration_number",
    "date_of_birth",
    "ssn",
];

const DATE_KEYS: &[&str] = &["born", "died", "founded", "dissolved", "start", "end"];

/// Thresholds the pair checks depend on
#[derive(Debug, Clone, Copy)]
pub struct PairThresholds {
    /// Minimum signal for a duplicate
    pub duplicate: f32,
    /// Minimum text similarity for attribute and temporal candidates
    pub candidate: f32,
}

/// Similarity signals computed for a duplicate check
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DuplicateSignals {
    pub exact: f32,
    pub fuzzy: f32,
    pub cosine: Option<f32>,
    pub properties: Option<f32>,
}

impl DuplicateSignals {
    /// Strongest signal
    pub fn max(&self) -> f32 {
        [
            Some(self.exact),
            Some(self.fuzzy),
            self.cosine,
            self.properties,
        ]
        .into_iter()
        .flatten()
        .fold(0.0, f32::max)
    }
}

/// Whether either entity was declared distinct from the other
pub fn declared_distinct(a: &Entity, b: &Entity) -> bool {
    a.is_distinct_from(&b.id) || b.is_distinct_from(&a.id)
}

/// Normalized type label used for grouping
pub fn type_key(entity: &Entity) -> String {
    entity.entity_type.trim().to_lowercase()
}

/// Compute duplicate signals for a pair
///
/// Cosine is only computed when both embeddings are present. The property
/// signal needs at least one shared key: maps with no key in common score
/// 0.0 anyway, and two empty maps carry no evidence either way.
pub fn duplicate_signals(
    a: &Entity,
    b: &Entity,
    a_embedding: Option<&[f32]>,
    b_embedding: Option<&[f32]>,
) -> DuplicateSignals {
    let exact = if exact_text_match(&a.text, &b.text) {
        1.0
    } else {
        0.0
    };
    let fuzzy = text_similarity(&a.text, &b.text);

    let cosine = match (a_embedding, b_embedding) {
        (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => Some(cosine_similarity(x, y)),
        _ => None,
    };

    let properties = a
        .properties
        .keys()
        .any(|k| b.properties.contains_key(k))
        .then(|| property_similarity(&a.properties, &b.properties));

    DuplicateSignals {
        exact,
        fuzzy,
        cosine,
        properties,
    }
}

/// Duplicate-entity check
pub fn check_duplicate(
    a: &Entity,
    b: &Entity,
    a_embedding: Option<&[f32]>,
    b_embedding: Option<&[f32]>,
    thresholds: PairThresholds,
) -> Option<NewConflict> {
    let signals = duplicate_signals(a, b, a_embedding, b_embedding);
    let max_similarity = signals.max();
    if max_similarity < thresholds.duplicate {
        return None;
    }

    let mut context = Map::new();
    context.insert(
        "signals".into(),
        json!({
            "exact": signals.exact,
            "fuzzy": signals.fuzzy,
            "cosine": signals.cosine,
            "properties": signals.properties,
        }),
    );
    context.insert("entity_type".into(), Value::from(a.entity_type.clone()));

    Some(
        NewConflict::new(
            ConflictType::DuplicateEntity,
            ConflictSubject::entities(&a.id, &b.id),
            Severity::from_similarity(max_similarity),
            max_similarity,
            format!(
                "'{}' and '{}' ({}) look like the same entity (similarity {:.2})",
                a.text, b.text, a.entity_type, max_similarity
            ),
        )
        .with_context(context),
    )
}

/// Whether a property key holds a date
pub fn is_date_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.contains("date") || key.ends_with("_at") || DATE_KEYS.contains(&key.as_str())
}

/// Parse a property value as a calendar date
///
/// Accepts RFC 3339 timestamps, `YYYY-MM-DD`, `YYYY-MM`, `YYYY` and bare
/// integer years.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .filter(|year| (1..=9999).contains(year))
            .and_then(|year| NaiveDate::from_ymd_opt(year as i32, 1, 1)),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if s.len() == 7
        && let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
    {
        return Some(date);
    }
    if s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1));
    }
    None
}

fn mismatch_severity(ratio: f32) -> Severity {
    if ratio >= 0.75 {
        Severity::High
    } else if ratio >= 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn gap_severity(days: i64) -> Severity {
    if days > 365 {
        Severity::High
    } else if days > 30 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Attribute-mismatch check for a candidate pair
///
/// `pair_similarity` is the text similarity that made the pair a candidate.
pub fn check_attribute_mismatch(
    a: &Entity,
    b: &Entity,
    pair_similarity: f32,
) -> Option<NewConflict> {
    let mut shared = 0usize;
    let mut mismatched = Map::new();
    let mut identity_mismatch = false;

    for (key, left) in &a.properties {
        if is_date_key(key) {
            continue;
        }
        let Some(right) = b.properties.get(key) else {
            continue;
        };
        shared += 1;
        if left == right {
            continue;
        }
        let similarity = text_similarity(&stringify_value(left), &stringify_value(right));
        if similarity < ATTRIBUTE_MATCH_THRESHOLD {
            if IDENTITY_KEYS.contains(&key.to_lowercase().as_str()) {
                identity_mismatch = true;
            }
            mismatched.insert(
                key.clone(),
                json!({ "source": left, "target": right, "similarity": similarity }),
            );
        }
    }

    if mismatched.is_empty() {
        return None;
    }

    let ratio = mismatched.len() as f32 / shared as f32;
    let severity = if identity_mismatch {
        Severity::Critical
    } else {
        mismatch_severity(ratio)
    };

    let mut context = Map::new();
    context.insert("shared_keys".into(), json!(shared));
    context.insert("mismatch_ratio".into(), json!(ratio));
    context.insert("text_similarity".into(), json!(pair_similarity));

    let keys: Vec<&str> = mismatched.keys().map(String::as_str).collect();
    let description = format!(
        "'{}' and '{}' disagree on {}",
        a.text,
        b.text,
        keys.join(", ")
    );

    Some(
        NewConflict::new(
            ConflictType::AttributeMismatch,
            ConflictSubject::entities(&a.id, &b.id),
            severity,
            pair_similarity,
            description,
        )
        .with_conflicting_attributes(mismatched)
        .with_context(context),
    )
}

/// Temporal check for a candidate pair
///
/// Only date keys where both values parse and differ count. Unparseable
/// values are left to the attribute check's blind spot.
pub fn check_temporal(a: &Entity, b: &Entity, pair_similarity: f32) -> Option<NewConflict> {
    let mut conflicting = Map::new();
    let mut largest_gap = 0i64;

    for (key, left) in &a.properties {
        if !is_date_key(key) {
            continue;
        }
        let Some(right) = b.properties.get(key) else {
            continue;
        };
        let (Some(left_date), Some(right_date)) = (parse_date(left), parse_date(right)) else {
            continue;
        };
        if left_date == right_date {
            continue;
        }
        let gap = (left_date - right_date).num_days().abs();
        largest_gap = largest_gap.max(gap);
        conflicting.insert(
            key.clone(),
            json!({ "source": left, "target": right, "gap_days": gap }),
        );
    }

    if conflicting.is_empty() {
        return None;
    }

    let mut context = Map::new();
    context.insert("largest_gap_days".into(), json!(largest_gap));
    context.insert("text_similarity".into(), json!(pair_similarity));

    Some(
        NewConflict::new(
            ConflictType::TemporalConflict,
            ConflictSubject::entities(&a.id, &b.id),
            gap_severity(largest_gap),
            pair_similarity,
            format!(
                "'{}' and '{}' disagree on dates by up to {} days",
                a.text, b.text, largest_gap
            ),
        )
        .with_conflicting_attributes(conflicting)
        .with_context(context),
    )
}

/// Source conflict between two same-text entities from different documents
pub fn source_conflict(
    first: &Entity,
    other: &Entity,
    group_context: &Map<String, Value>,
) -> NewConflict {
    let severity = if property_similarity(&first.properties, &other.properties) < 1.0 {
        Severity::Medium
    } else {
        Severity::Low
    };

    NewConflict::new(
        ConflictType::SourceConflict,
        ConflictSubject::entities(&first.id, &other.id),
        severity,
        first.confidence.min(other.confidence),
        format!(
            "'{}' ({}) was extracted from multiple source documents",
            first.text, first.entity_type
        ),
    )
    .with_context(group_context.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> PairThresholds {
        PairThresholds {
            duplicate: 0.85,
            candidate: 0.75,
        }
    }

    #[test]
    fn test_case_folded_duplicate_is_critical() {
        let a = Entity::new("John Smith", "Person").with_id("a");
        let b = Entity::new("john smith", "Person").with_id("b");
        let conflict = check_duplicate(&a, &b, None, None, thresholds()).unwrap();
        assert_eq!(conflict.confidence_score, 1.0);
        assert_eq!(conflict.severity, Severity::Critical);
    }

    #[test]
    fn test_matching_properties_flag_differently_named_pair() {
        let a = Entity::new("Apple", "Organization").with_property("country", "US");
        let b = Entity::new("Microsoft", "Organization").with_property("country", "US");
        let conflict = check_duplicate(&a, &b, None, None, thresholds()).unwrap();
        assert_eq!(conflict.confidence_score, 1.0);
        assert_eq!(conflict.severity, Severity::Critical);
    }

    #[test]
    fn test_property_signal_needs_a_shared_key() {
        let a = Entity::new("Apple", "Organization");
        let b = Entity::new("Microsoft", "Organization");
        assert_eq!(duplicate_signals(&a, &b, None, None).properties, None);
        assert!(check_duplicate(&a, &b, None, None, thresholds()).is_none());

        let c = Entity::new("Apple", "Organization").with_property("country", "US");
        let d = Entity::new("Microsoft", "Organization").with_property("ceo", "Satya Nadella");
        assert!(check_duplicate(&c, &d, None, None, thresholds()).is_none());
    }

    #[test]
    fn test_cosine_signal_can_flag_duplicates() {
        let a = Entity::new("IBM", "Organization");
        let b = Entity::new("International Business Machines", "Organization");
        let v = [0.3f32, 0.4, 0.5];
        let conflict = check_duplicate(&a, &b, Some(&v), Some(&v), thresholds()).unwrap();
        assert!(conflict.confidence_score > 0.99);
    }

    #[test]
    fn test_date_keys() {
        assert!(is_date_key("founding_date"));
        assert!(is_date_key("created_at"));
        assert!(is_date_key("Founded"));
        assert!(!is_date_key("name"));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        assert_eq!(parse_date(&json!("2020-03-01")), Some(expected));
        assert_eq!(parse_date(&json!("2020-03")), Some(expected));
        assert_eq!(parse_date(&json!("2020-03-01T10:00:00Z")), Some(expected));
        assert_eq!(
            parse_date(&json!("2020")),
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
        assert_eq!(parse_date(&json!(1998)), NaiveDate::from_ymd_opt(1998, 1, 1));
        assert_eq!(parse_date(&json!("sometime")), None);
    }

    #[test]
    fn test_attribute_mismatch_severity() {
        let a = Entity::new("Acme Corp", "Organization")
            .with_property("ceo", "Alice Jones")
            .with_property("country", "US");
        let b = Entity::new("Acme Corp.", "Organization")
            .with_property("ceo", "Bob Brown")
            .with_property("country", "US");
        let conflict = check_attribute_mismatch(&a, &b, 0.9).unwrap();
        assert_eq!(conflict.severity, Severity::Medium);
        assert_eq!(conflict.confidence_score, 0.9);
        let attrs = conflict.conflicting_attributes.unwrap();
        assert!(attrs.contains_key("ceo"));
        assert!(!attrs.contains_key("country"));
    }

    #[test]
    fn test_identity_key_mismatch_is_critical() {
        let a = Entity::new("Acme", "Organization").with_property("lei", "5493001KJTIIGC8Y1R12");
        let b = Entity::new("Acme", "Organization").with_property("lei", "X");
        let conflict = check_attribute_mismatch(&a, &b, 1.0).unwrap();
        assert_eq!(conflict.severity, Severity::Critical);
    }

    #[test]
    fn test_dates_excluded_from_attribute_check() {
        let a = Entity::new("Acme", "Organization").with_property("founded", "1990");
        let b = Entity::new("Acme", "Organization").with_property("founded", "2001");
        assert!(check_attribute_mismatch(&a, &b, 1.0).is_none());
        let temporal = check_temporal(&a, &b, 1.0).unwrap();
        assert_eq!(temporal.severity, Severity::High);
    }

    #[test]
    fn test_temporal_gap_severity() {
        let a = Entity::new("Jane", "Person").with_property("start_date", "2020-01-01");
        let b = Entity::new("Jane", "Person").with_property("start_date", "2020-01-20");
        assert_eq!(check_temporal(&a, &b, 1.0).unwrap().severity, Severity::Low);

        let c = Entity::new("Jane", "Person").with_property("start_date", "2020-04-01");
        assert_eq!(check_temporal(&a, &c, 1.0).unwrap().severity, Severity::Medium);

        let same = Entity::new("Jane", "Person").with_property("start_date", "2020-01-01T00:00:00Z");
        assert!(check_temporal(&a, &same, 1.0).is_none());
    }

    #[test]
    fn test_source_conflict_severity() {
        let a = Entity::new("Acme", "Organization").with_property("hq", "Berlin");
        let b = Entity::new("acme", "Organization").with_property("hq", "Munich");
        let c = Entity::new("ACME", "Organization").with_property("hq", "Berlin");
        assert_eq!(source_conflict(&a, &b, &Map::new()).severity, Severity::Medium);
        assert_eq!(source_conflict(&a, &c, &Map::new()).severity, Severity::Low);
    }
}
