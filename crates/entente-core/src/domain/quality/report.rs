//! Quality report types and recommendations

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conflict::{ConflictStats, ConflictStatus};

/// A scored aspect of graph quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Completeness,
    Accuracy,
    Consistency,
    Validity,
    Uniqueness,
}

impl QualityDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::Accuracy => "accuracy",
            Self::Consistency => "consistency",
            Self::Validity => "validity",
            Self::Uniqueness => "uniqueness",
        }
    }

    pub fn all() -> &'static [QualityDimension] {
        &[
            Self::Completeness,
            Self::Accuracy,
            Self::Consistency,
            Self::Validity,
            Self::Uniqueness,
        ]
    }

    /// What to do when the dimension scores low
    fn advice(&self) -> &'static str {
        match self {
            Self::Completeness => {
                "Attach source documents, properties and embeddings to sparse entities"
            }
            Self::Accuracy => "Verify low-confidence entities or re-extract them from better sources",
            Self::Consistency => {
                "Resolve open contradictory, attribute and temporal conflicts"
            }
            Self::Validity => {
                "Repair relationships that point at inactive entities and fill empty entity text"
            }
            Self::Uniqueness => "Review open duplicate and source conflicts and merge where appropriate",
        }
    }
}

impl fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Score for one dimension, in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: QualityDimension,
    pub score: f32,
    pub details: String,
}

/// Conflict counts included in a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub total: u64,
    pub open: u64,
    pub pending_review: u64,
    pub resolved: u64,
    pub open_high_severity: u64,
    pub resolution_rate: f32,
}

impl From<&ConflictStats> for ConflictSummary {
    fn from(stats: &ConflictStats) -> Self {
        Self {
            total: stats.total,
            open: stats.open,
            pending_review: stats.status_count(ConflictStatus::UnderReview),
            resolved: stats.resolved,
            open_high_severity: stats.open_high_severity,
            resolution_rate: stats.resolution_rate(),
        }
    }
}

/// Recommendation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// An action suggested by a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    /// Dimension name, or `conflicts`
    pub area: String,
    pub message: String,
}

/// Snapshot of knowledge graph quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub overall_score: f32,
    pub dimensions: Vec<DimensionScore>,
    pub conflict_summary: ConflictSummary,
    pub recommendations: Vec<Recommendation>,
}

impl QualityReport {
    /// Score of one dimension
    pub fn score(&self, dimension: QualityDimension) -> Option<f32> {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map(|d| d.score)
    }
}

/// Build prioritized recommendations, highest priority first
pub fn recommendations(
    dimensions: &[DimensionScore],
    summary: &ConflictSummary,
    threshold: f32,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    for dim in dimensions.iter().filter(|d| d.score < threshold) {
        out.push(Recommendation {
            priority: if dim.score < threshold - 0.2 {
                Priority::High
            } else {
                Priority::Medium
            },
            area: dim.dimension.to_string(),
            message: format!(
                "{} is {:.0}% (target {:.0}%). {}",
                dim.dimension,
                dim.score * 100.0,
                threshold * 100.0,
                dim.dimension.advice()
            ),
        });
    }

    if summary.open_high_severity > 0 {
        out.push(Recommendation {
            priority: Priority::High,
            area: "conflicts".to_string(),
            message: format!(
                "{} high or critical severity conflicts are unresolved",
                summary.open_high_severity
            ),
        });
    }

    if summary.pending_review > 0 {
        out.push(Recommendation {
            priority: Priority::Medium,
            area: "conflicts".to_string(),
            message: format!(
                "{} conflicts are waiting for expert review",
                summary.pending_review
            ),
        });
    }

    if out.is_empty() && summary.open > 0 {
        out.push(Recommendation {
            priority: Priority::Low,
            area: "conflicts".to_string(),
            message: format!("{} low-impact conflicts remain open", summary.open),
        });
    }

    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(dimension: QualityDimension, score: f32) -> DimensionScore {
        DimensionScore {
            dimension,
            score,
            details: String::new(),
        }
    }

    #[test]
    fn test_recommendations_prioritized() {
        let dims = vec![
            score(QualityDimension::Completeness, 0.75),
            score(QualityDimension::Accuracy, 0.4),
            score(QualityDimension::Validity, 0.95),
        ];
        let summary = ConflictSummary {
            pending_review: 2,
            ..Default::default()
        };

        let recs = recommendations(&dims, &summary, 0.8);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[0].area, "accuracy");
        assert!(recs.iter().any(|r| r.area == "completeness" && r.priority == Priority::Medium));
        assert!(recs.iter().any(|r| r.message.contains("waiting for expert review")));
        assert!(!recs.iter().any(|r| r.area == "validity"));
    }

    #[test]
    fn test_healthy_graph_has_no_recommendations() {
        let dims = vec![score(QualityDimension::Uniqueness, 1.0)];
        assert!(recommendations(&dims, &ConflictSummary::default(), 0.8).is_empty());
    }
}
