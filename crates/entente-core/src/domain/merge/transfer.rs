//! Relationship transfer between entities
//!
//! Moves every active relationship of a losing entity onto the winner. An
//! edge that would duplicate one the winner already has is folded into it
//! instead: the moved edge is deactivated with `merged_into` set and the
//! survivor keeps the higher confidence. Running a transfer twice is a
//! no-op the second time.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::knowledge::{KnowledgeGraphRepository, Relationship};
use crate::error::Result;

/// What a transfer did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Relationships re-pointed at the winner
    pub moved: Vec<String>,
    /// Relationships folded into an equivalent edge (moved id, survivor id)
    pub deduplicated: Vec<(String, String)>,
}

impl TransferSummary {
    /// Combine two summaries
    pub fn absorb(&mut self, other: TransferSummary) {
        self.moved.extend(other.moved);
        self.deduplicated.extend(other.deduplicated);
    }
}

/// Move the active relationships of `from_id` to `to_id`
///
/// The caller must hold the entity locks of both ids.
pub async fn transfer_relationships(
    repository: &dyn KnowledgeGraphRepository,
    from_id: &str,
    to_id: &str,
) -> Result<TransferSummary> {
    let mut summary = TransferSummary::default();
    if from_id == to_id {
        return Ok(summary);
    }

    let mut winner_edges = repository.list_relationships_for_entity(to_id, true).await?;
    let losing_edges = repository.list_relationships_for_entity(from_id, true).await?;

    for original in losing_edges {
        let mut moved = original.clone();
        moved.redirect_endpoint(from_id, to_id);

        let survivor = winner_edges
            .iter_mut()
            .find(|edge| edge.id != original.id && edge.is_active && edge.is_equivalent_to(&moved));

        match survivor {
            Some(survivor) => {
                if original.confidence > survivor.confidence {
                    survivor.confidence = original.confidence;
                    survivor.updated_at = chrono::Utc::now();
                    repository.save_relationship(survivor).await?;
                }
                let mut folded = original;
                folded.deactivate(Some(&survivor.id));
                repository.save_relationship(&folded).await?;

                debug!(relationship_id = %folded.id, survivor = %survivor.id, "Folded duplicate edge");
                summary
                    .deduplicated
                    .push((folded.id.clone(), survivor.id.clone()));
            }
            None => {
                repository.save_relationship(&moved).await?;
                debug!(relationship_id = %moved.id, from = from_id, to = to_id, "Moved edge");
                summary.moved.push(moved.id.clone());
                upsert(&mut winner_edges, moved);
            }
        }
    }

    Ok(summary)
}

fn upsert(edges: &mut Vec<Relationship>, edge: Relationship) {
    match edges.iter_mut().find(|e| e.id == edge.id) {
        Some(existing) => *existing = edge,
        None => edges.push(edge),
    }
}
