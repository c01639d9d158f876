//! Conflict store contract
//!
//! Conflicts are created by detection and mutated by the resolution engine.
//! Stores never delete them. Rollback snapshots captured before mutating
//! actions live alongside the conflicts they belong to.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::knowledge::{Entity, Relationship};
use crate::error::{Error, Result};

use super::types::{Conflict, ConflictKey, ConflictStatus, ConflictType, NewConflict, Severity};

/// Default page size for conflict listings
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Repository trait for conflict persistence
#[async_trait]
pub trait ConflictRepository: Send + Sync {
    /// Save a conflict (insert or update)
    async fn save_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// Get a conflict by ID
    async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>>;

    /// Query conflicts, newest first, with the total match count
    async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<ConflictPage>;

    /// Count conflicts matching a filter, ignoring paging
    async fn count_conflicts(&self, filter: &ConflictFilter) -> Result<u64>;

    /// Identity keys of every stored conflict, in any status
    async fn conflict_keys(&self) -> Result<HashSet<ConflictKey>>;

    /// Aggregate counts
    async fn stats(&self) -> Result<ConflictStats>;

    /// Store a pre-mutation snapshot
    async fn save_snapshot(&self, snapshot: &RollbackSnapshot) -> Result<()>;

    /// Snapshots for a conflict, oldest first
    async fn list_snapshots(&self, conflict_id: &str) -> Result<Vec<RollbackSnapshot>>;

    /// Persist a detected conflict
    async fn create_conflict(&self, new: NewConflict) -> Result<Conflict> {
        let conflict = Conflict::from_new(new);
        self.save_conflict(&conflict).await?;
        Ok(conflict)
    }

    /// Get a conflict or fail with `ConflictNotFound`
    async fn require_conflict(&self, id: &str) -> Result<Conflict> {
        self.get_conflict(id)
            .await?
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))
    }
}

/// Filter for conflict queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictFilter {
    pub status: Option<ConflictStatus>,
    pub conflict_type: Option<ConflictType>,
    pub severity: Option<Severity>,
    pub assigned_to: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: usize,
}

impl ConflictFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ConflictStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, conflict_type: ConflictType) -> Self {
        self.conflict_type = Some(conflict_type);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn assigned_to(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }

    pub fn paginate(mut self, limit: usize, skip: usize) -> Self {
        self.limit = Some(limit);
        self.skip = skip;
        self
    }

    /// Whether a conflict satisfies the non-paging part of the filter
    pub fn matches(&self, conflict: &Conflict) -> bool {
        self.status.is_none_or(|s| conflict.status == s)
            && self.conflict_type.is_none_or(|t| conflict.conflict_type == t)
            && self.severity.is_none_or(|s| conflict.severity == s)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|user| conflict.assigned_to.as_deref() == Some(user))
    }

    /// Effective page size
    pub fn page_size(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// One page of a conflict query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictPage {
    pub conflicts: Vec<Conflict>,
    /// Matches before paging
    pub total: u64,
    pub limit: usize,
    pub skip: usize,
}

/// Aggregate conflict counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    /// Conflicts in `detected` or `under_review`
    pub open: u64,
    /// Conflicts in a resolved state
    pub resolved: u64,
    /// Open conflicts with high or critical severity
    pub open_high_severity: u64,
}

impl ConflictStats {
    /// Aggregate over an iterator of conflicts
    pub fn from_conflicts<'a>(conflicts: impl IntoIterator<Item = &'a Conflict>) -> Self {
        let mut stats = Self::default();
        for conflict in conflicts {
            stats.record(conflict.status, conflict.conflict_type, conflict.severity, 1);
        }
        stats
    }

    /// Add `count` conflicts sharing a status, type and severity
    pub fn record(
        &mut self,
        status: ConflictStatus,
        conflict_type: ConflictType,
        severity: Severity,
        count: u64,
    ) {
        self.total += count;
        *self.by_status.entry(status.to_string()).or_default() += count;
        *self.by_type.entry(conflict_type.to_string()).or_default() += count;
        *self.by_severity.entry(severity.to_string()).or_default() += count;

        if status.is_open() {
            self.open += count;
            if severity >= Severity::High {
                self.open_high_severity += count;
            }
        }
        if matches!(
            status,
            ConflictStatus::ResolvedAuto | ConflictStatus::ResolvedManual
        ) {
            self.resolved += count;
        }
    }

    /// Count for one status
    pub fn status_count(&self, status: ConflictStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Share of conflicts that were resolved
    pub fn resolution_rate(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.resolved as f32 / self.total as f32
    }
}

/// Pre-mutation state captured before a resolution action runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub id: String,
    pub conflict_id: String,
    /// Action about to run (e.g. "merge_entities")
    pub action: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub captured_at: DateTime<Utc>,
}

impl RollbackSnapshot {
    /// Capture a snapshot
    pub fn capture(
        conflict_id: impl Into<String>,
        action: impl Into<String>,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_id: conflict_id.into(),
            action: action.into(),
            entities,
            relationships,
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conflict::ConflictSubject;

    fn conflict(conflict_type: ConflictType, severity: Severity) -> Conflict {
        Conflict::from_new(NewConflict::new(
            conflict_type,
            ConflictSubject::entities("a", "b"),
            severity,
            0.9,
            "test",
        ))
    }

    #[test]
    fn test_filter_matches() {
        let mut c = conflict(ConflictType::DuplicateEntity, Severity::High);
        assert!(ConflictFilter::new().matches(&c));
        assert!(ConflictFilter::new()
            .with_type(ConflictType::DuplicateEntity)
            .with_severity(Severity::High)
            .matches(&c));
        assert!(!ConflictFilter::new()
            .with_status(ConflictStatus::UnderReview)
            .matches(&c));

        c.assign(Some("alice")).unwrap();
        assert!(ConflictFilter::new().assigned_to("alice").matches(&c));
        assert!(!ConflictFilter::new().assigned_to("bob").matches(&c));
    }

    #[test]
    fn test_stats_aggregation() {
        let a = conflict(ConflictType::DuplicateEntity, Severity::Critical);
        let b = conflict(ConflictType::TemporalConflict, Severity::Low);
        let mut c = conflict(ConflictType::DuplicateEntity, Severity::Medium);
        c.transition_to(ConflictStatus::Rejected).unwrap();

        let stats = ConflictStats::from_conflicts([&a, &b, &c]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.open, 2);
        assert_eq!(stats.open_high_severity, 1);
        assert_eq!(stats.by_type.get("duplicate_entity"), Some(&2));
        assert_eq!(stats.status_count(ConflictStatus::Rejected), 1);
        assert_eq!(stats.resolution_rate(), 0.0);
    }
}
