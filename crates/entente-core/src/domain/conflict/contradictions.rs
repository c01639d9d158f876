//! Contradictory relationship detection
//!
//! Two relationships between the same ordered endpoint pair contradict each
//! other when their type labels appear together in a static table.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::domain::knowledge::Relationship;

use super::types::{ConflictSubject, ConflictType, NewConflict, Severity};

/// Relationship type pairs that cannot both hold between the same endpoints
///
/// Lookups are symmetric, so each pair is listed once.
const CONTRADICTIONS: &[(&str, &str)] = &[
    ("EMPLOYED_BY", "UNEMPLOYED"),
    ("EMPLOYED_BY", "RETIRED_FROM"),
    ("EMPLOYED_BY", "FORMERLY_EMPLOYED_BY"),
    ("WORKS_FOR", "UNEMPLOYED"),
    ("WORKS_FOR", "RETIRED_FROM"),
    ("OWNS", "SOLD"),
    ("OWNS", "DIVESTED"),
    ("MARRIED_TO", "DIVORCED_FROM"),
    ("PARENT_OF", "CHILD_OF"),
    ("SUBSIDIARY_OF", "PARENT_COMPANY_OF"),
    ("ACQUIRED", "ACQUIRED_BY"),
    ("CEO_OF", "FORMER_CEO_OF"),
    ("MEMBER_OF", "FORMER_MEMBER_OF"),
    ("ALLIED_WITH", "AT_WAR_WITH"),
];

/// Whether two relationship type labels contradict each other
pub fn types_contradict(a: &str, b: &str) -> bool {
    let a = a.trim().to_uppercase();
    let b = b.trim().to_uppercase();
    CONTRADICTIONS
        .iter()
        .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

/// Scan relationships for contradictions
///
/// Relationships are grouped by `(source, target)`; every combination of two
/// relationships inside a group is checked against the table. Inactive
/// relationships are ignored.
pub fn detect_contradictions(relationships: &[Relationship]) -> Vec<NewConflict> {
    let mut groups: HashMap<(&str, &str), Vec<&Relationship>> = HashMap::new();
    let mut order: Vec<(&str, &str)> = Vec::new();

    for rel in relationships.iter().filter(|r| r.is_active) {
        let key = (rel.source_entity_id.as_str(), rel.target_entity_id.as_str());
        let group = groups.entry(key).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(rel);
    }

    let mut conflicts = Vec::new();
    for key in order {
        let Some(group) = groups.get(&key) else {
            continue;
        };
        if group.len() < 2 {
            continue;
        }
        for (i, first) in group.iter().enumerate() {
            for second in &group[i + 1..] {
                if types_contradict(&first.relationship_type, &second.relationship_type) {
                    conflicts.push(contradiction_conflict(first, second));
                }
            }
        }
    }
    conflicts
}

fn contradiction_conflict(first: &Relationship, second: &Relationship) -> NewConflict {
    let confidence = first.confidence.min(second.confidence);
    let gap = (first.confidence - second.confidence).abs();

    let mut attributes = Map::new();
    attributes.insert(
        "relationship_type".to_string(),
        json!({
            "source": first.relationship_type,
            "target": second.relationship_type,
        }),
    );

    let mut context = Map::new();
    context.insert("source_entity_id".into(), Value::from(first.source_entity_id.clone()));
    context.insert("target_entity_id".into(), Value::from(first.target_entity_id.clone()));
    context.insert(
        "relationship_confidences".into(),
        json!([first.confidence, second.confidence]),
    );
    context.insert("confidence_gap".into(), json!(gap));

    NewConflict::new(
        ConflictType::ContradictoryRelationship,
        ConflictSubject::relationships(&first.id, &second.id),
        Severity::High,
        confidence,
        format!(
            "Relationships '{}' and '{}' between the same entities contradict each other",
            first.relationship_type, second.relationship_type
        ),
    )
    .with_conflicting_attributes(attributes)
    .with_context(context)
}

/// Confidence gap recorded on a contradiction conflict
pub fn confidence_gap(context: Option<&Map<String, Value>>) -> Option<f32> {
    context?
        .get("confidence_gap")
        .and_then(Value::as_f64)
        .map(|g| g as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_symmetric_and_case_insensitive() {
        assert!(types_contradict("EMPLOYED_BY", "UNEMPLOYED"));
        assert!(types_contradict("unemployed", "employed_by"));
        assert!(!types_contradict("EMPLOYED_BY", "KNOWS"));
        assert!(!types_contradict("EMPLOYED_BY", "EMPLOYED_BY"));
    }

    #[test]
    fn test_detects_contradiction_with_min_confidence() {
        let rels = vec![
            Relationship::new("a", "b", "EMPLOYED_BY").with_id("r1").with_confidence(0.9),
            Relationship::new("a", "b", "UNEMPLOYED").with_id("r2").with_confidence(0.4),
        ];
        let conflicts = detect_contradictions(&rels);
        assert_eq!(conflicts.len(), 1);

        let conflict = &conflicts[0];
        assert_eq!(conflict.conflict_type, ConflictType::ContradictoryRelationship);
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.confidence_score, 0.4);
        assert_eq!(conflict.subject, ConflictSubject::relationships("r1", "r2"));

        let gap = confidence_gap(conflict.context_data.as_ref()).unwrap();
        assert!((gap - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_different_pairs_do_not_contradict() {
        let rels = vec![
            Relationship::new("a", "b", "EMPLOYED_BY"),
            Relationship::new("a", "c", "UNEMPLOYED"),
            Relationship::new("b", "a", "UNEMPLOYED"),
        ];
        assert!(detect_contradictions(&rels).is_empty());
    }

    #[test]
    fn test_inactive_relationships_ignored() {
        let mut retired = Relationship::new("a", "b", "RETIRED_FROM");
        retired.deactivate(None);
        let rels = vec![Relationship::new("a", "b", "EMPLOYED_BY"), retired];
        assert!(detect_contradictions(&rels).is_empty());
    }
}
