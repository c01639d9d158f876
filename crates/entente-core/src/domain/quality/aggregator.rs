//! Quality aggregation over the knowledge graph and its conflicts

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DimensionWeights, QualityConfig};
use crate::domain::conflict::{ConflictFilter, ConflictRepository, ConflictStatus, ConflictType};
use crate::domain::knowledge::{Entity, EntityQuery, KnowledgeGraphRepository, Relationship};
use crate::error::Result;

use super::report::{
    ConflictSummary, DimensionScore, QualityDimension, QualityReport, recommendations,
};

const CONSISTENCY_TYPES: [ConflictType; 3] = [
    ConflictType::ContradictoryRelationship,
    ConflictType::AttributeMismatch,
    ConflictType::TemporalConflict,
];

const UNIQUENESS_TYPES: [ConflictType; 2] =
    [ConflictType::DuplicateEntity, ConflictType::SourceConflict];

/// Computes quality reports
pub struct QualityAggregator {
    knowledge: Arc<dyn KnowledgeGraphRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    config: QualityConfig,
}

impl QualityAggregator {
    pub fn new(
        knowledge: Arc<dyn KnowledgeGraphRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        config: QualityConfig,
    ) -> Self {
        Self {
            knowledge,
            conflicts,
            config,
        }
    }

    /// Score every dimension and summarize conflicts
    pub async fn generate_report(&self) -> Result<QualityReport> {
        let entities = self.knowledge.list_entities(&EntityQuery::active()).await?;
        let relationships = self.knowledge.list_relationships(true, None).await?;
        let stats = self.conflicts.stats().await?;

        let open_consistency = self.open_conflicts(&CONSISTENCY_TYPES).await?;
        let open_uniqueness = self.open_conflicts(&UNIQUENESS_TYPES).await?;

        let dimensions = vec![
            completeness(&entities),
            accuracy(&entities),
            consistency(open_consistency, entities.len() + relationships.len()),
            validity(&entities, &relationships),
            uniqueness(open_uniqueness, entities.len()),
        ];
        let overall_score = weighted_overall(&dimensions, &self.config.weights);
        let conflict_summary = ConflictSummary::from(&stats);
        let recommendations = recommendations(
            &dimensions,
            &conflict_summary,
            self.config.recommendation_threshold,
        );

        info!(
            overall = overall_score,
            entities = entities.len(),
            relationships = relationships.len(),
            open_conflicts = conflict_summary.open,
            recommendations = recommendations.len(),
            "Generated quality report"
        );

        Ok(QualityReport {
            generated_at: Utc::now(),
            overall_score,
            dimensions,
            conflict_summary,
            recommendations,
        })
    }

    async fn open_conflicts(&self, types: &[ConflictType]) -> Result<u64> {
        let mut total = 0;
        for conflict_type in types {
            for status in [ConflictStatus::Detected, ConflictStatus::UnderReview] {
                total += self
                    .conflicts
                    .count_conflicts(
                        &ConflictFilter::new()
                            .with_type(*conflict_type)
                            .with_status(status),
                    )
                    .await?;
            }
        }
        Ok(total)
    }

    /// Generate a report every `interval` until `token` is cancelled
    ///
    /// Reports are delivered on the returned channel. A full channel drops
    /// the report; a closed one stops the task.
    pub fn spawn_periodic_reports(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> (JoinHandle<()>, mpsc::Receiver<QualityReport>) {
        let (tx, rx) = mpsc::channel(4);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        debug!("Periodic quality reports cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = match self.generate_report().await {
                            Ok(report) => report,
                            Err(e) => {
                                warn!(error = %e, "Quality report failed");
                                continue;
                            }
                        };
                        match tx.try_send(report) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!("Quality report receiver is behind, dropping report");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
        });

        (handle, rx)
    }
}

fn ratio(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        1.0
    } else {
        part as f32 / whole as f32
    }
}

fn completeness(entities: &[Entity]) -> DimensionScore {
    let score = if entities.is_empty() {
        1.0
    } else {
        let total: f32 = entities
            .iter()
            .map(|e| {
                let filled = [
                    !e.properties.is_empty(),
                    e.source_document_id.is_some(),
                    e.has_embedding(),
                    !e.text.trim().is_empty(),
                ]
                .iter()
                .filter(|present| **present)
                .count();
                filled as f32 / 4.0
            })
            .sum();
        total / entities.len() as f32
    };

    DimensionScore {
        dimension: QualityDimension::Completeness,
        score,
        details: format!("{} active entities scored", entities.len()),
    }
}

fn accuracy(entities: &[Entity]) -> DimensionScore {
    let (score, details) = if entities.is_empty() {
        (1.0, "no active entities".to_string())
    } else {
        let mean_confidence =
            entities.iter().map(|e| e.confidence).sum::<f32>() / entities.len() as f32;
        let verified = entities.iter().filter(|e| e.is_verified).count();
        let verified_ratio = ratio(verified, entities.len());
        (
            0.7 * mean_confidence + 0.3 * verified_ratio,
            format!(
                "mean confidence {:.2}, {} of {} verified",
                mean_confidence,
                verified,
                entities.len()
            ),
        )
    };

    DimensionScore {
        dimension: QualityDimension::Accuracy,
        score,
        details,
    }
}

fn consistency(open: u64, records: usize) -> DimensionScore {
    DimensionScore {
        dimension: QualityDimension::Consistency,
        score: (1.0 - open as f32 / records.max(1) as f32).max(0.0),
        details: format!("{} open consistency conflicts over {} records", open, records),
    }
}

fn validity(entities: &[Entity], relationships: &[Relationship]) -> DimensionScore {
    let active: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let valid_edges = relationships
        .iter()
        .filter(|r| {
            active.contains(r.source_entity_id.as_str())
                && active.contains(r.target_entity_id.as_str())
        })
        .count();
    let named = entities.iter().filter(|e| !e.text.trim().is_empty()).count();

    DimensionScore {
        dimension: QualityDimension::Validity,
        score: (ratio(valid_edges, relationships.len()) + ratio(named, entities.len())) / 2.0,
        details: format!(
            "{} of {} relationships have active endpoints",
            valid_edges,
            relationships.len()
        ),
    }
}

fn uniqueness(open: u64, entities: usize) -> DimensionScore {
    DimensionScore {
        dimension: QualityDimension::Uniqueness,
        score: (1.0 - open as f32 / entities.max(1) as f32).max(0.0),
        details: format!("{} open duplicate conflicts over {} entities", open, entities),
    }
}

fn weighted_overall(dimensions: &[DimensionScore], weights: &DimensionWeights) -> f32 {
    let weight = |d: QualityDimension| match d {
        QualityDimension::Completeness => weights.completeness,
        QualityDimension::Accuracy => weights.accuracy,
        QualityDimension::Consistency => weights.consistency,
        QualityDimension::Validity => weights.validity,
        QualityDimension::Uniqueness => weights.uniqueness,
    };

    let total_weight: f32 = dimensions.iter().map(|d| weight(d.dimension).max(0.0)).sum();
    if total_weight <= 0.0 {
        return dimensions.iter().map(|d| d.score).sum::<f32>() / dimensions.len().max(1) as f32;
    }
    dimensions
        .iter()
        .map(|d| d.score * weight(d.dimension).max(0.0))
        .sum::<f32>()
        / total_weight
}
