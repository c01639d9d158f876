//! Deterministic resolution rules

use serde_json::{Map, Value, json};

use crate::config::ResolutionConfig;
use crate::domain::conflict::contradictions::confidence_gap;
use crate::domain::conflict::{Conflict, ConflictType, ResolutionMethod, Severity};

/// A rule that fired for a conflict
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDecision {
    pub method: ResolutionMethod,
    pub reasoning: String,
    pub actions: Map<String, Value>,
}

/// Pick a resolution without a model, or `None` when a person should decide
pub fn rule_based_resolution(conflict: &Conflict, config: &ResolutionConfig) -> Option<RuleDecision> {
    match conflict.conflict_type {
        ConflictType::DuplicateEntity | ConflictType::SourceConflict
            if conflict.confidence_score >= config.auto_merge_threshold =>
        {
            Some(RuleDecision {
                method: ResolutionMethod::MergeEntities,
                reasoning: format!(
                    "Confidence {:.2} meets the auto-merge threshold {:.2}",
                    conflict.confidence_score, config.auto_merge_threshold
                ),
                actions: actions(json!({"merge_strategy": "most_complete"})),
            })
        }
        ConflictType::ContradictoryRelationship => {
            let gap = confidence_gap(conflict.context_data.as_ref())?;
            (gap >= config.relationship_confidence_gap).then(|| RuleDecision {
                method: ResolutionMethod::DeleteConflicting,
                reasoning: format!(
                    "Confidence gap {:.2} between the contradictory relationships favors the stronger claim",
                    gap
                ),
                actions: Map::new(),
            })
        }
        ConflictType::TemporalConflict if conflict.severity == Severity::Low => {
            Some(RuleDecision {
                method: ResolutionMethod::TemporalOrdering,
                reasoning: "Dates differ by at most a month; keeping the most recently updated record"
                    .to_string(),
                actions: Map::new(),
            })
        }
        ConflictType::DuplicateEntity
        | ConflictType::SourceConflict
        | ConflictType::TemporalConflict
        | ConflictType::AttributeMismatch => None,
    }
}

fn actions(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conflict::{ConflictSubject, NewConflict};

    fn conflict(conflict_type: ConflictType, severity: Severity, confidence: f32) -> Conflict {
        let subject = if conflict_type.is_relationship_conflict() {
            ConflictSubject::relationships("r1", "r2")
        } else {
            ConflictSubject::entities("e1", "e2")
        };
        Conflict::from_new(NewConflict::new(conflict_type, subject, severity, confidence, "test"))
    }

    #[test]
    fn test_duplicate_merges_above_threshold() {
        let config = ResolutionConfig::default();
        let high = conflict(ConflictType::DuplicateEntity, Severity::Critical, 0.97);
        let decision = rule_based_resolution(&high, &config).unwrap();
        assert_eq!(decision.method, ResolutionMethod::MergeEntities);

        let low = conflict(ConflictType::DuplicateEntity, Severity::High, 0.9);
        assert!(rule_based_resolution(&low, &config).is_none());
    }

    #[test]
    fn test_contradiction_needs_gap() {
        let config = ResolutionConfig::default();
        let mut wide = conflict(ConflictType::ContradictoryRelationship, Severity::High, 0.4);
        let mut context = Map::new();
        context.insert("confidence_gap".into(), json!(0.5));
        wide.context_data = Some(context);
        assert_eq!(
            rule_based_resolution(&wide, &config).unwrap().method,
            ResolutionMethod::DeleteConflicting
        );

        let mut narrow = wide.clone();
        narrow
            .context_data
            .as_mut()
            .unwrap()
            .insert("confidence_gap".into(), json!(0.1));
        assert!(rule_based_resolution(&narrow, &config).is_none());

        let bare = conflict(ConflictType::ContradictoryRelationship, Severity::High, 0.4);
        assert!(rule_based_resolution(&bare, &config).is_none());
    }

    #[test]
    fn test_temporal_and_attribute_rules() {
        let config = ResolutionConfig::default();
        let minor = conflict(ConflictType::TemporalConflict, Severity::Low, 0.9);
        assert_eq!(
            rule_based_resolution(&minor, &config).unwrap().method,
            ResolutionMethod::TemporalOrdering
        );
        let major = conflict(ConflictType::TemporalConflict, Severity::High, 0.9);
        assert!(rule_based_resolution(&major, &config).is_none());

        let mismatch = conflict(ConflictType::AttributeMismatch, Severity::Low, 1.0);
        assert!(rule_based_resolution(&mismatch, &config).is_none());
    }
}
