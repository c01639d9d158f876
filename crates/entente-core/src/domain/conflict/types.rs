//! Conflict records and resolution payloads
//!
//! A conflict names exactly one pair of entities or one pair of
//! relationships. Conflicts are never deleted; they move through the
//! status machine until they land in an immutable terminal state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// `detected_by` value for conflicts found by the detector
pub const SYSTEM_DETECTOR: &str = "system";

/// `resolved_by` value for AI-applied resolutions
pub const AI_SYSTEM: &str = "ai_system";

/// Class of data-quality problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Two entities denote the same real-world thing
    DuplicateEntity,
    /// Two relationships between the same endpoints cannot both hold
    ContradictoryRelationship,
    /// Likely-same entities disagree on attribute values
    AttributeMismatch,
    /// Likely-same entities disagree on dates
    TemporalConflict,
    /// Same surface entity extracted from different documents
    SourceConflict,
}

impl ConflictType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateEntity => "duplicate_entity",
            Self::ContradictoryRelationship => "contradictory_relationship",
            Self::AttributeMismatch => "attribute_mismatch",
            Self::TemporalConflict => "temporal_conflict",
            Self::SourceConflict => "source_conflict",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "duplicate_entity" | "duplicate" => Some(Self::DuplicateEntity),
            "contradictory_relationship" | "contradiction" => Some(Self::ContradictoryRelationship),
            "attribute_mismatch" => Some(Self::AttributeMismatch),
            "temporal_conflict" | "temporal" => Some(Self::TemporalConflict),
            "source_conflict" | "source" => Some(Self::SourceConflict),
            _ => None,
        }
    }

    /// Get all conflict types
    pub fn all() -> &'static [ConflictType] {
        &[
            Self::DuplicateEntity,
            Self::ContradictoryRelationship,
            Self::AttributeMismatch,
            Self::TemporalConflict,
            Self::SourceConflict,
        ]
    }

    /// Whether conflicts of this type are about relationships
    pub fn is_relationship_conflict(&self) -> bool {
        matches!(self, Self::ContradictoryRelationship)
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conflict severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Step function over a similarity score
    pub fn from_similarity(score: f32) -> Self {
        if score >= 0.95 {
            Self::Critical
        } else if score >= 0.9 {
            Self::High
        } else if score >= 0.8 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Detected,
    UnderReview,
    ResolvedManual,
    ResolvedAuto,
    Rejected,
    Escalated,
}

impl ConflictStatus {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::UnderReview => "under_review",
            Self::ResolvedManual => "resolved_manual",
            Self::ResolvedAuto => "resolved_auto",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "detected" => Some(Self::Detected),
            "under_review" | "review" => Some(Self::UnderReview),
            "resolved_manual" => Some(Self::ResolvedManual),
            "resolved_auto" => Some(Self::ResolvedAuto),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// `detected` and `under_review` are the only open states
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Detected | Self::UnderReview)
    }

    /// Resolved and rejected conflicts never change again
    pub fn is_immutable(&self) -> bool {
        matches!(
            self,
            Self::ResolvedManual | Self::ResolvedAuto | Self::Rejected
        )
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: ConflictStatus) -> bool {
        use ConflictStatus::*;
        match self {
            Detected => matches!(
                next,
                UnderReview | ResolvedAuto | ResolvedManual | Rejected | Escalated
            ),
            UnderReview => matches!(
                next,
                UnderReview | ResolvedAuto | ResolvedManual | Rejected | Escalated
            ),
            Escalated => matches!(next, UnderReview | ResolvedManual | Rejected),
            ResolvedManual | ResolvedAuto | Rejected => false,
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pair of records a conflict is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictSubject {
    Entities {
        source_entity_id: String,
        target_entity_id: String,
    },
    Relationships {
        source_relationship_id: String,
        target_relationship_id: String,
    },
}

impl ConflictSubject {
    /// Entity pair subject
    pub fn entities(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Entities {
            source_entity_id: source.into(),
            target_entity_id: target.into(),
        }
    }

    /// Relationship pair subject
    pub fn relationships(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Relationships {
            source_relationship_id: source.into(),
            target_relationship_id: target.into(),
        }
    }

    /// Both ids, in subject order
    pub fn ids(&self) -> (&str, &str) {
        match self {
            Self::Entities {
                source_entity_id,
                target_entity_id,
            } => (source_entity_id, target_entity_id),
            Self::Relationships {
                source_relationship_id,
                target_relationship_id,
            } => (source_relationship_id, target_relationship_id),
        }
    }

    /// Whether the subject is an entity pair
    pub fn is_entities(&self) -> bool {
        matches!(self, Self::Entities { .. })
    }
}

/// Order-independent identity of a conflict, used for de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConflictKey {
    pub conflict_type: ConflictType,
    pub first_id: String,
    pub second_id: String,
}

impl ConflictKey {
    /// Build a key from a type and an unordered pair
    pub fn new(conflict_type: ConflictType, a: &str, b: &str) -> Self {
        let (first_id, second_id) = if a <= b { (a, b) } else { (b, a) };
        Self {
            conflict_type,
            first_id: first_id.to_string(),
            second_id: second_id.to_string(),
        }
    }
}

/// Resolution method chosen for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    MergeEntities,
    KeepBoth,
    KeepSource,
    KeepTarget,
    CreateNew,
    DeleteConflicting,
    ManualEdit,
    AiResolution,
    TemporalOrdering,
    SourcePrioritization,
}

impl ResolutionMethod {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MergeEntities => "merge_entities",
            Self::KeepBoth => "keep_both",
            Self::KeepSource => "keep_source",
            Self::KeepTarget => "keep_target",
            Self::CreateNew => "create_new",
            Self::DeleteConflicting => "delete_conflicting",
            Self::ManualEdit => "manual_edit",
            Self::AiResolution => "ai_resolution",
            Self::TemporalOrdering => "temporal_ordering",
            Self::SourcePrioritization => "source_prioritization",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "merge_entities" | "merge" => Some(Self::MergeEntities),
            "keep_both" => Some(Self::KeepBoth),
            "keep_source" => Some(Self::KeepSource),
            "keep_target" => Some(Self::KeepTarget),
            "create_new" => Some(Self::CreateNew),
            "delete_conflicting" => Some(Self::DeleteConflicting),
            "manual_edit" => Some(Self::ManualEdit),
            "ai_resolution" => Some(Self::AiResolution),
            "temporal_ordering" => Some(Self::TemporalOrdering),
            "source_prioritization" => Some(Self::SourcePrioritization),
            _ => None,
        }
    }

    /// Get all resolution methods
    pub fn all() -> &'static [ResolutionMethod] {
        &[
            Self::MergeEntities,
            Self::KeepBoth,
            Self::KeepSource,
            Self::KeepTarget,
            Self::CreateNew,
            Self::DeleteConflicting,
            Self::ManualEdit,
            Self::AiResolution,
            Self::TemporalOrdering,
            Self::SourcePrioritization,
        ]
    }

    /// Methods that may be applied without a human in the loop
    pub fn is_auto_applicable(&self) -> bool {
        !matches!(self, Self::ManualEdit)
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The action and rationale that settled a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolution_method: ResolutionMethod,
    /// Action parameters plus the folded action result
    #[serde(default)]
    pub resolution_data: Map<String, Value>,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
    /// Expert id or [`AI_SYSTEM`]
    pub resolved_by: String,
    pub resolution_timestamp: DateTime<Utc>,
}

/// A detected but not yet persisted conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConflict {
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub confidence_score: f32,
    pub subject: ConflictSubject,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicting_attributes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<Map<String, Value>>,
    pub detected_by: String,
}

impl NewConflict {
    /// Create a system-detected conflict
    pub fn new(
        conflict_type: ConflictType,
        subject: ConflictSubject,
        severity: Severity,
        confidence_score: f32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            conflict_type,
            severity,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            subject,
            description: description.into(),
            conflicting_attributes: None,
            context_data: None,
            detected_by: SYSTEM_DETECTOR.to_string(),
        }
    }

    /// Attach conflicting attribute values
    pub fn with_conflicting_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.conflicting_attributes = Some(attributes);
        self
    }

    /// Attach detection context
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context_data = Some(context);
        self
    }

    /// Order-independent identity
    pub fn key(&self) -> ConflictKey {
        let (a, b) = self.subject.ids();
        ConflictKey::new(self.conflict_type, a, b)
    }
}

/// A persisted conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub status: ConflictStatus,
    pub confidence_score: f32,
    pub subject: ConflictSubject,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicting_attributes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_data: Option<Map<String, Value>>,
    pub detected_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conflict {
    /// Materialize a detected conflict
    pub fn from_new(new: NewConflict) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_type: new.conflict_type,
            severity: new.severity,
            status: ConflictStatus::Detected,
            confidence_score: new.confidence_score,
            subject: new.subject,
            description: new.description,
            conflicting_attributes: new.conflicting_attributes,
            context_data: new.context_data,
            detected_by: new.detected_by,
            assigned_to: None,
            resolution: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Order-independent identity
    pub fn key(&self) -> ConflictKey {
        let (a, b) = self.subject.ids();
        ConflictKey::new(self.conflict_type, a, b)
    }

    /// Entity pair, when this is an entity conflict
    pub fn entity_pair(&self) -> Option<(&str, &str)> {
        match &self.subject {
            ConflictSubject::Entities {
                source_entity_id,
                target_entity_id,
            } => Some((source_entity_id, target_entity_id)),
            ConflictSubject::Relationships { .. } => None,
        }
    }

    /// Relationship pair, when this is a relationship conflict
    pub fn relationship_pair(&self) -> Option<(&str, &str)> {
        match &self.subject {
            ConflictSubject::Relationships {
                source_relationship_id,
                target_relationship_id,
            } => Some((source_relationship_id, target_relationship_id)),
            ConflictSubject::Entities { .. } => None,
        }
    }

    /// Move to `next`, enforcing the status machine
    pub fn transition_to(&mut self, next: ConflictStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                conflict_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Assign to an expert and move under review
    pub fn assign(&mut self, expert_id: Option<&str>) -> Result<()> {
        self.transition_to(ConflictStatus::UnderReview)?;
        self.assigned_to = expert_id.map(str::to_string);
        Ok(())
    }

    /// Record a resolution and move to a resolved state
    pub fn resolve(&mut self, resolution: Resolution, status: ConflictStatus) -> Result<()> {
        if !matches!(
            status,
            ConflictStatus::ResolvedAuto | ConflictStatus::ResolvedManual
        ) {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a resolved status",
                status
            )));
        }
        self.transition_to(status)?;
        self.resolution = Some(resolution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_conflict() -> Conflict {
        Conflict::from_new(NewConflict::new(
            ConflictType::DuplicateEntity,
            ConflictSubject::entities("a", "b"),
            Severity::High,
            0.92,
            "duplicate",
        ))
    }

    #[test]
    fn test_severity_step_function() {
        assert_eq!(Severity::from_similarity(1.0), Severity::Critical);
        assert_eq!(Severity::from_similarity(0.95), Severity::Critical);
        assert_eq!(Severity::from_similarity(0.94), Severity::High);
        assert_eq!(Severity::from_similarity(0.9), Severity::High);
        assert_eq!(Severity::from_similarity(0.85), Severity::Medium);
        assert_eq!(Severity::from_similarity(0.5), Severity::Low);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_status_machine() {
        use ConflictStatus::*;
        assert!(Detected.can_transition_to(UnderReview));
        assert!(Detected.can_transition_to(ResolvedAuto));
        assert!(UnderReview.can_transition_to(ResolvedManual));
        assert!(Escalated.can_transition_to(ResolvedManual));
        assert!(!Escalated.can_transition_to(ResolvedAuto));
        for terminal in [ResolvedAuto, ResolvedManual, Rejected] {
            assert!(terminal.is_immutable());
            for next in [Detected, UnderReview, ResolvedAuto, ResolvedManual, Rejected, Escalated] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_resolved_conflict_is_immutable() {
        let mut conflict = sample_conflict();
        let resolution = Resolution {
            resolution_method: ResolutionMethod::MergeEntities,
            resolution_data: Map::new(),
            reasoning: "same".into(),
            confidence_score: Some(0.99),
            resolved_by: AI_SYSTEM.into(),
            resolution_timestamp: Utc::now(),
        };
        conflict
            .resolve(resolution, ConflictStatus::ResolvedAuto)
            .unwrap();
        assert_eq!(conflict.status, ConflictStatus::ResolvedAuto);

        let err = conflict.assign(Some("expert")).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = ConflictKey::new(ConflictType::DuplicateEntity, "x", "y");
        let b = ConflictKey::new(ConflictType::DuplicateEntity, "y", "x");
        let c = ConflictKey::new(ConflictType::SourceConflict, "x", "y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_method_parsing() {
        for method in ResolutionMethod::all() {
            assert_eq!(ResolutionMethod::parse(method.as_str()), Some(*method));
        }
        assert_eq!(ResolutionMethod::parse("Merge-Entities"), Some(ResolutionMethod::MergeEntities));
        assert_eq!(ResolutionMethod::parse("manual_review"), None);
    }

    #[test]
    fn test_subject_serialization() {
        let conflict = sample_conflict();
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["subject"]["kind"], "entities");
        assert_eq!(json["subject"]["source_entity_id"], "a");
        assert_eq!(json["status"], "detected");
    }
}
