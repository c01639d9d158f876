//! Conflict detector
//!
//! Scans a snapshot of the knowledge graph for the five conflict classes.
//! The passes run concurrently over the same snapshot and fail
//! independently: a failed pass is reported in [`DetectionReport::pass_errors`]
//! and the others still contribute.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::domain::knowledge::{Entity, EntityQuery, KnowledgeGraphRepository, Relationship};
use crate::domain::providers::EmbeddingProvider;
use crate::domain::similarity::text_similarity;
use crate::error::Result;

use super::checks::{
    PairThresholds, check_attribute_mismatch, check_duplicate, check_temporal, declared_distinct,
    source_conflict, type_key,
};
use super::contradictions::detect_contradictions;
use super::repository::ConflictRepository;
use super::types::{Conflict, ConflictKey, NewConflict};

/// One of the independent detection passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPass {
    DuplicateEntity,
    ContradictoryRelationship,
    AttributeMismatch,
    TemporalConflict,
    SourceConflict,
}

impl DetectionPass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateEntity => "duplicate_entity",
            Self::ContradictoryRelationship => "contradictory_relationship",
            Self::AttributeMismatch => "attribute_mismatch",
            Self::TemporalConflict => "temporal_conflict",
            Self::SourceConflict => "source_conflict",
        }
    }
}

impl fmt::Display for DetectionPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pass that failed, with its error message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassError {
    pub pass: DetectionPass,
    pub message: String,
}

/// Outcome of a full detection run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    /// New, de-duplicated candidate conflicts
    pub conflicts: Vec<NewConflict>,
    /// Passes that failed
    pub pass_errors: Vec<PassError>,
    /// Conflicts contributed by each pass after de-duplication
    pub pass_counts: BTreeMap<String, usize>,
    pub entities_scanned: usize,
    pub relationships_scanned: usize,
}

impl DetectionReport {
    /// Whether every pass succeeded
    pub fn is_complete(&self) -> bool {
        self.pass_errors.is_empty()
    }
}

/// Counters for a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Items attempted, including failed ones
    pub entities_processed: usize,
    pub conflicts_found: usize,
    pub errors: usize,
}

/// A batch item that failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub entity_id: String,
    pub message: String,
}

/// Outcome of `batch_detect_conflicts`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDetectionResult {
    pub conflicts: Vec<NewConflict>,
    pub stats: BatchStats,
    pub errors: Vec<BatchItemError>,
}

/// Data every pass reads
struct Snapshot {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    /// Same-type pairs (by index) whose text similarity clears the candidate threshold
    candidates: Vec<(usize, usize, f32)>,
}

/// Drops candidates already stored or already emitted in this run
struct Deduplicator {
    seen: HashSet<ConflictKey>,
}

impl Deduplicator {
    fn new(existing: HashSet<ConflictKey>) -> Self {
        Self { seen: existing }
    }

    fn admit(&mut self, conflict: &NewConflict) -> bool {
        self.seen.insert(conflict.key())
    }
}

/// Detects conflicts in the knowledge graph
pub struct ConflictDetector {
    knowledge: Arc<dyn KnowledgeGraphRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    config: DetectionConfig,
}

impl ConflictDetector {
    /// Create a detector without an embedding provider
    pub fn new(
        knowledge: Arc<dyn KnowledgeGraphRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            knowledge,
            conflicts,
            embeddings: None,
            config,
        }
    }

    /// Attach an embedding provider for lazy embedding generation
    pub fn with_embeddings(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(provider);
        self
    }

    fn thresholds(&self) -> PairThresholds {
        PairThresholds {
            duplicate: self.config.duplicate_threshold,
            candidate: self.config.candidate_threshold,
        }
    }

    /// Run all five passes over active entities
    ///
    /// With `entity_ids` only those entities (and relationships touching
    /// them) are scanned; otherwise the first `batch_size` active entities
    /// are.
    pub async fn detect_all_conflicts(
        &self,
        entity_ids: Option<&[String]>,
        batch_size: Option<usize>,
    ) -> Result<DetectionReport> {
        let snapshot = self.load_snapshot(entity_ids, batch_size).await?;
        let existing = self.conflicts.conflict_keys().await?;

        info!(
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            candidates = snapshot.candidates.len(),
            "Starting conflict detection"
        );

        let (duplicates, contradictions, mismatches, temporal, sources) = tokio::join!(
            self.duplicate_pass(&snapshot),
            self.contradiction_pass(&snapshot),
            self.attribute_pass(&snapshot),
            self.temporal_pass(&snapshot),
            self.source_pass(&snapshot),
        );

        let mut report = DetectionReport {
            entities_scanned: snapshot.entities.len(),
            relationships_scanned: snapshot.relationships.len(),
            ..Default::default()
        };
        let mut dedup = Deduplicator::new(existing);

        for (pass, outcome) in [
            (DetectionPass::DuplicateEntity, duplicates),
            (DetectionPass::ContradictoryRelationship, contradictions),
            (DetectionPass::AttributeMismatch, mismatches),
            (DetectionPass::TemporalConflict, temporal),
            (DetectionPass::SourceConflict, sources),
        ] {
            match outcome {
                Ok(candidates) => {
                    let before = report.conflicts.len();
                    for candidate in candidates {
                        if dedup.admit(&candidate) {
                            report.conflicts.push(candidate);
                        } else {
                            debug!(pass = %pass, key = ?candidate.key(), "Skipping known conflict");
                        }
                    }
                    report
                        .pass_counts
                        .insert(pass.to_string(), report.conflicts.len() - before);
                }
                Err(e) => {
                    warn!(pass = %pass, error = %e, "Detection pass failed");
                    report.pass_errors.push(PassError {
                        pass,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            conflicts = report.conflicts.len(),
            failed_passes = report.pass_errors.len(),
            "Conflict detection finished"
        );
        Ok(report)
    }

    /// Persist a report's conflicts
    pub async fn detect_and_store(&self, report: &DetectionReport) -> Result<Vec<Conflict>> {
        let mut stored = Vec::with_capacity(report.conflicts.len());
        for candidate in &report.conflicts {
            stored.push(self.conflicts.create_conflict(candidate.clone()).await?);
        }
        info!(count = stored.len(), "Stored detected conflicts");
        Ok(stored)
    }

    /// Check each entity against the active graph, one at a time
    ///
    /// A failing item is counted in `stats.errors` and does not stop the
    /// batch; earlier items are not rolled back.
    pub async fn batch_detect_conflicts(&self, entity_ids: &[String]) -> Result<BatchDetectionResult> {
        let peers = self.knowledge.list_entities(&EntityQuery::active()).await?;
        let mut dedup = Deduplicator::new(self.conflicts.conflict_keys().await?);
        let mut result = BatchDetectionResult::default();

        for entity_id in entity_ids {
            result.stats.entities_processed += 1;
            match self.detect_for_entity(entity_id, &peers).await {
                Ok(candidates) => {
                    for candidate in candidates {
                        if dedup.admit(&candidate) {
                            result.conflicts.push(candidate);
                        }
                    }
                }
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Batch detection item failed");
                    result.stats.errors += 1;
                    result.errors.push(BatchItemError {
                        entity_id: entity_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        result.stats.conflicts_found = result.conflicts.len();
        info!(
            processed = result.stats.entities_processed,
            conflicts = result.stats.conflicts_found,
            errors = result.stats.errors,
            "Batch detection finished"
        );
        Ok(result)
    }

    async fn detect_for_entity(&self, entity_id: &str, peers: &[Entity]) -> Result<Vec<NewConflict>> {
        let mut entity = self.knowledge.require_entity(entity_id).await?;
        if !entity.is_active {
            debug!(entity_id, "Skipping inactive entity");
            return Ok(Vec::new());
        }

        if self.config.use_embeddings
            && !entity.has_embedding()
            && let Some(provider) = &self.embeddings
        {
            entity.embedding = provider.get_text_embedding(&entity.text).await;
        }

        let thresholds = self.thresholds();
        let kind = type_key(&entity);
        let mut found = Vec::new();
        let mut same_text = Vec::new();

        for peer in peers {
            if peer.id == entity.id || type_key(peer) != kind || declared_distinct(&entity, peer) {
                continue;
            }

            if let Some(c) = check_duplicate(
                &entity,
                peer,
                entity.embedding.as_deref(),
                peer.embedding.as_deref(),
                thresholds,
            ) {
                found.push(c);
            }

            let similarity = text_similarity(&entity.text, &peer.text);
            if similarity >= thresholds.candidate {
                found.extend(check_attribute_mismatch(&entity, peer, similarity));
                found.extend(check_temporal(&entity, peer, similarity));
            }

            if peer.normalized_text() == entity.normalized_text()
                && let (Some(mine), Some(theirs)) =
                    (&entity.source_document_id, &peer.source_document_id)
                && mine != theirs
            {
                same_text.push(peer);
            }
        }

        if !same_text.is_empty() {
            let mut members = vec![&entity];
            members.extend(same_text.iter().copied());
            let context = self.source_group_context(&members).await?;
            for peer in &same_text {
                found.push(source_conflict(&entity, peer, &context));
            }
        }

        let relationships = self
            .knowledge
            .list_relationships_for_entity(entity_id, true)
            .await?;
        found.extend(detect_contradictions(&relationships));

        debug!(entity_id, conflicts = found.len(), "Checked entity");
        Ok(found)
    }

    async fn load_snapshot(
        &self,
        entity_ids: Option<&[String]>,
        batch_size: Option<usize>,
    ) -> Result<Snapshot> {
        let (entities, relationships) = match entity_ids {
            Some(ids) => {
                let entities = self
                    .knowledge
                    .list_entities(&EntityQuery::active().with_ids(ids.to_vec()))
                    .await?;
                let mut relationships = Vec::new();
                let mut seen = HashSet::new();
                for entity in &entities {
                    for rel in self
                        .knowledge
                        .list_relationships_for_entity(&entity.id, true)
                        .await?
                    {
                        if seen.insert(rel.id.clone()) {
                            relationships.push(rel);
                        }
                    }
                }
                (entities, relationships)
            }
            None => {
                let limit = batch_size.unwrap_or(self.config.batch_size).max(1);
                let entities = self
                    .knowledge
                    .list_entities(&EntityQuery::active().with_limit(limit))
                    .await?;
                let relationships = self.knowledge.list_relationships(true, None).await?;
                (entities, relationships)
            }
        };

        let candidates = candidate_pairs(&entities, self.config.candidate_threshold);
        Ok(Snapshot {
            entities,
            relationships,
            candidates,
        })
    }

    async fn duplicate_pass(&self, snapshot: &Snapshot) -> Result<Vec<NewConflict>> {
        let embeddings = self.collect_embeddings(&snapshot.entities).await;
        let thresholds = self.thresholds();
        let mut found = Vec::new();

        for group in type_groups(&snapshot.entities).values() {
            for (pos, &i) in group.iter().enumerate() {
                for &j in &group[pos + 1..] {
                    let (a, b) = (&snapshot.entities[i], &snapshot.entities[j]);
                    if declared_distinct(a, b) {
                        continue;
                    }
                    let a_embedding = embeddings.get(a.id.as_str()).map(Vec::as_slice);
                    let b_embedding = embeddings.get(b.id.as_str()).map(Vec::as_slice);
                    if let Some(conflict) = check_duplicate(a, b, a_embedding, b_embedding, thresholds) {
                        debug!(source = %a.id, target = %b.id, score = conflict.confidence_score, "Duplicate candidate");
                        found.push(conflict);
                    }
                }
            }
        }
        Ok(found)
    }

    async fn contradiction_pass(&self, snapshot: &Snapshot) -> Result<Vec<NewConflict>> {
        Ok(detect_contradictions(&snapshot.relationships))
    }

    async fn attribute_pass(&self, snapshot: &Snapshot) -> Result<Vec<NewConflict>> {
        Ok(snapshot
            .candidates
            .iter()
            .filter_map(|&(i, j, similarity)| {
                check_attribute_mismatch(&snapshot.entities[i], &snapshot.entities[j], similarity)
            })
            .collect())
    }

    async fn temporal_pass(&self, snapshot: &Snapshot) -> Result<Vec<NewConflict>> {
        Ok(snapshot
            .candidates
            .iter()
            .filter_map(|&(i, j, similarity)| {
                check_temporal(&snapshot.entities[i], &snapshot.entities[j], similarity)
            })
            .collect())
    }

    async fn source_pass(&self, snapshot: &Snapshot) -> Result<Vec<NewConflict>> {
        let mut groups: BTreeMap<(String, String), Vec<&Entity>> = BTreeMap::new();
        for entity in &snapshot.entities {
            if entity.source_document_id.is_some() {
                groups
                    .entry((entity.normalized_text(), type_key(entity)))
                    .or_default()
                    .push(entity);
            }
        }

        let mut found = Vec::new();
        for members in groups.values() {
            let documents: HashSet<&str> = members
                .iter()
                .filter_map(|e| e.source_document_id.as_deref())
                .collect();
            if documents.len() < 2 {
                continue;
            }

            let context = self.source_group_context(members).await?;
            let first = members[0];
            for other in &members[1..] {
                if other.source_document_id == first.source_document_id
                    || declared_distinct(first, other)
                {
                    continue;
                }
                found.push(source_conflict(first, other, &context));
            }
        }
        Ok(found)
    }

    /// Context shared by all conflicts of one source group
    ///
    /// A document row that no longer exists is listed as `missing` rather
    /// than failing the group; repository errors still propagate.
    async fn source_group_context(&self, members: &[&Entity]) -> Result<Map<String, Value>> {
        let mut document_ids: Vec<&str> = members
            .iter()
            .filter_map(|e| e.source_document_id.as_deref())
            .collect();
        document_ids.sort_unstable();
        document_ids.dedup();

        let mut documents = Vec::with_capacity(document_ids.len());
        for id in document_ids {
            match self.knowledge.get_document(id).await? {
                Some(document) => documents.push(json!({
                    "id": document.id,
                    "title": document.title,
                    "reliability": document.reliability,
                })),
                None => {
                    warn!(document_id = id, "Source document missing, recording it as such");
                    documents.push(json!({ "id": id, "missing": true }));
                }
            }
        }

        let mut context = Map::new();
        context.insert(
            "group_text".into(),
            Value::from(members.first().map(|e| e.text.clone()).unwrap_or_default()),
        );
        context.insert(
            "entity_ids".into(),
            json!(members.iter().map(|e| e.id.as_str()).collect::<Vec<_>>()),
        );
        context.insert("documents".into(), Value::Array(documents));
        Ok(context)
    }

    /// Stored embeddings plus lazily generated ones for comparable entities
    ///
    /// Generated embeddings are written back best-effort; a provider or
    /// storage failure only drops the cosine signal.
    async fn collect_embeddings<'a>(&self, entities: &'a [Entity]) -> HashMap<&'a str, Vec<f32>> {
        let mut embeddings: HashMap<&str, Vec<f32>> = entities
            .iter()
            .filter(|e| e.has_embedding())
            .filter_map(|e| e.embedding.clone().map(|v| (e.id.as_str(), v)))
            .collect();

        let Some(provider) = self.embeddings.as_ref().filter(|_| self.config.use_embeddings) else {
            return embeddings;
        };

        let missing: Vec<&Entity> = type_groups(entities)
            .values()
            .filter(|group| group.len() > 1)
            .flatten()
            .map(|&i| &entities[i])
            .filter(|e| !e.has_embedding())
            .collect();
        if missing.is_empty() {
            return embeddings;
        }

        let generated = join_all(
            missing
                .iter()
                .map(|entity| provider.get_text_embedding(&entity.text)),
        )
        .await;

        for (entity, vector) in missing.into_iter().zip(generated) {
            let Some(vector) = vector.filter(|v| !v.is_empty()) else {
                warn!(entity_id = %entity.id, "Embedding unavailable, skipping cosine signal");
                continue;
            };
            let updated = entity.clone().with_embedding(vector.clone());
            if let Err(e) = self.knowledge.save_entity(&updated).await {
                warn!(entity_id = %entity.id, error = %e, "Failed to cache embedding");
            }
            embeddings.insert(entity.id.as_str(), vector);
        }
        embeddings
    }
}

/// Indices of entities grouped by normalized type
fn type_groups(entities: &[Entity]) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, entity) in entities.iter().enumerate() {
        groups.entry(type_key(entity)).or_default().push(i);
    }
    groups
}

/// Same-type pairs similar enough to be inspected for attribute and date disagreement
fn candidate_pairs(entities: &[Entity], threshold: f32) -> Vec<(usize, usize, f32)> {
    let mut pairs = Vec::new();
    for group in type_groups(entities).values() {
        for (pos, &i) in group.iter().enumerate() {
            for &j in &group[pos + 1..] {
                let (a, b) = (&entities[i], &entities[j]);
                if declared_distinct(a, b) {
                    continue;
                }
                let similarity = text_similarity(&a.text, &b.text);
                if similarity >= threshold {
                    pairs.push((i, j, similarity));
                }
            }
        }
    }
    pairs
}
