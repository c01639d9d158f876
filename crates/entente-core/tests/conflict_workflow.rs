//! Entente Core Integration Tests
//!
//! End-to-end detection, resolution and merge flows over the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use entente_core::config::{DetectionConfig, ResolutionConfig};
use entente_core::domain::access::{Role, StaticPermissionChecker};
use entente_core::domain::conflict::{
    ConflictDetector, ConflictFilter, ConflictRepository, ConflictStatus, ConflictSubject,
    ConflictType, DetectionPass, NewConflict, ResolutionMethod, Severity,
};
use entente_core::domain::knowledge::{
    Entity, EntityQuery, KnowledgeGraphRepository, Relationship, SourceDocument,
};
use entente_core::domain::locking::EntityLockManager;
use entente_core::domain::merge::{EntityMerger, MergeStrategy, transfer_relationships};
use entente_core::domain::providers::SuggestionProvider;
use entente_core::domain::resolution::{ManualResolution, ResolutionEngine, ResolutionPath};
use entente_core::infrastructure::memory::InMemoryStore;
use entente_core::{Error, Result};

// ========== Fixtures ==========

struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl SuggestionProvider for CountingProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"[{"resolution_method": "keep_target", "reasoning": "x", "confidence": 0.99}]"#.into())
    }
}

/// Knowledge repository with one unreadable entity row and optionally one
/// unreadable document row
struct FlakyRepository {
    inner: Arc<InMemoryStore>,
    broken_id: String,
    broken_document: Option<String>,
}

impl FlakyRepository {
    fn new(inner: Arc<InMemoryStore>, broken_id: &str) -> Self {
        Self {
            inner,
            broken_id: broken_id.to_string(),
            broken_document: None,
        }
    }

    fn with_broken_document(mut self, id: &str) -> Self {
        self.broken_document = Some(id.to_string());
        self
    }
}

#[async_trait]
impl KnowledgeGraphRepository for FlakyRepository {
    async fn save_entity(&self, entity: &Entity) -> Result<()> {
        self.inner.save_entity(entity).await
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        if id == self.broken_id {
            return Err(Error::StorageError(format!("corrupt row for '{}'", id)));
        }
        self.inner.get_entity(id).await
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        let mut entities = self.inner.list_entities(query).await?;
        entities.retain(|e| e.id != self.broken_id);
        Ok(entities)
    }

    async fn count_entities(&self, active_only: bool) -> Result<u64> {
        self.inner.count_entities(active_only).await
    }

    async fn save_relationship(&self, relationship: &Relationship) -> Result<()> {
        self.inner.save_relationship(relationship).await
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
        self.inner.get_relationship(id).await
    }

    async fn list_relationships_for_entity(
        &self,
        entity_id: &str,
        active_only: bool,
    ) -> Result<Vec<Relationship>> {
        self.inner
            .list_relationships_for_entity(entity_id, active_only)
            .await
    }

    async fn list_relationships(
        &self,
        active_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Relationship>> {
        self.inner.list_relationships(active_only, limit).await
    }

    async fn count_relationships(&self, active_only: bool) -> Result<u64> {
        self.inner.count_relationships(active_only).await
    }

    async fn save_document(&self, document: &SourceDocument) -> Result<()> {
        self.inner.save_document(document).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<SourceDocument>> {
        if self.broken_document.as_deref() == Some(id) {
            return Err(Error::StorageError(format!("corrupt document row '{}'", id)));
        }
        self.inner.get_document(id).await
    }
}

fn permissions() -> Arc<StaticPermissionChecker> {
    Arc::new(
        StaticPermissionChecker::new()
            .with_role("expert", Role::Expert)
            .with_role("editor", Role::Editor)
            .with_role("viewer", Role::Viewer),
    )
}

fn detector(store: &Arc<InMemoryStore>) -> ConflictDetector {
    ConflictDetector::new(store.clone(), store.clone(), DetectionConfig::default())
}

fn engine(store: &Arc<InMemoryStore>) -> ResolutionEngine {
    ResolutionEngine::new(
        store.clone(),
        store.clone(),
        permissions(),
        Arc::new(EntityLockManager::default()),
        ResolutionConfig::default(),
    )
}

async fn save(store: &InMemoryStore, entities: Vec<Entity>) {
    for entity in entities {
        store.save_entity(&entity).await.unwrap();
    }
}

async fn john_smith_pair(store: &InMemoryStore) {
    save(
        store,
        vec![
            Entity::new("John Smith", "Person").with_id("e1").with_confidence(0.9),
            Entity::new("john smith", "Person").with_id("e2").with_confidence(0.8),
        ],
    )
    .await;
}

fn sorted_pair((a, b): (&str, &str)) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Acme from d1 and d3, Globex from d1 and d2, with no d2 row
async fn split_source_graph(store: &InMemoryStore) {
    for id in ["d1", "d3"] {
        store
            .save_document(&SourceDocument::new(format!("report {}", id), "pdf").with_id(id))
            .await
            .unwrap();
    }
    save(
        store,
        vec![
            Entity::new("Acme Corp", "Organization").with_id("a1").with_source_document("d1"),
            Entity::new("Acme Corp", "Organization").with_id("a3").with_source_document("d3"),
            Entity::new("Globex", "Organization").with_id("g1").with_source_document("d1"),
            Entity::new("Globex", "Organization").with_id("g2").with_source_document("d2"),
        ],
    )
    .await;
}

fn source_conflicts(conflicts: &[NewConflict]) -> Vec<&NewConflict> {
    conflicts
        .iter()
        .filter(|c| c.conflict_type == ConflictType::SourceConflict)
        .collect()
}

async fn detect_and_store(detector: &ConflictDetector) -> usize {
    let report = detector.detect_all_conflicts(None, None).await.unwrap();
    assert!(report.is_complete());
    detector.detect_and_store(&report).await.unwrap().len()
}

// ========== Detection ==========

#[tokio::test]
async fn test_case_folded_duplicate_is_critical() {
    let store = Arc::new(InMemoryStore::new());
    john_smith_pair(&store).await;

    let report = detector(&store).detect_all_conflicts(None, None).await.unwrap();
    let duplicates: Vec<_> = report
        .conflicts
        .iter()
        .filter(|c| c.conflict_type == ConflictType::DuplicateEntity)
        .collect();

    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].confidence_score, 1.0);
    assert_eq!(duplicates[0].severity, Severity::Critical);
}

#[tokio::test]
async fn test_contradictory_relationships_detected_once() {
    let store = Arc::new(InMemoryStore::new());
    save(
        &store,
        vec![
            Entity::new("Jane Doe", "Person").with_id("a"),
            Entity::new("Acme Corp", "Organization").with_id("b"),
        ],
    )
    .await;
    store
        .save_relationship(&Relationship::new("a", "b", "EMPLOYED_BY").with_id("r1").with_confidence(0.9))
        .await
        .unwrap();
    store
        .save_relationship(&Relationship::new("a", "b", "UNEMPLOYED").with_id("r2").with_confidence(0.7))
        .await
        .unwrap();

    let report = detector(&store).detect_all_conflicts(None, None).await.unwrap();
    let contradictions: Vec<_> = report
        .conflicts
        .iter()
        .filter(|c| c.conflict_type == ConflictType::ContradictoryRelationship)
        .collect();

    assert_eq!(contradictions.len(), 1);
    assert_eq!(contradictions[0].severity, Severity::High);
    assert!((contradictions[0].confidence_score - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_missing_source_document_is_recorded_not_fatal() {
    let store = Arc::new(InMemoryStore::new());
    split_source_graph(&store).await;

    let report = detector(&store).detect_all_conflicts(None, None).await.unwrap();
    assert!(report.is_complete(), "{:?}", report.pass_errors);

    let sources = source_conflicts(&report.conflicts);
    assert_eq!(sources.len(), 2);
    let globex = sources
        .iter()
        .find(|c| sorted_pair(c.subject.ids()) == sorted_pair(("g1", "g2")))
        .unwrap();
    let documents = globex.context_data.as_ref().unwrap()["documents"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0]["id"], "d1");
    assert_eq!(documents[1]["id"], "d2");
    assert_eq!(documents[1]["missing"], true);

    let batch = detector(&store)
        .batch_detect_conflicts(&["g2".to_string()])
        .await
        .unwrap();
    assert_eq!(batch.stats.errors, 0);
    assert_eq!(source_conflicts(&batch.conflicts).len(), 1);
    assert!(
        batch
            .conflicts
            .iter()
            .any(|c| c.conflict_type == ConflictType::DuplicateEntity)
    );
}

#[tokio::test]
async fn test_failed_pass_does_not_drop_other_passes() {
    let store = Arc::new(InMemoryStore::new());
    split_source_graph(&store).await;
    save(
        &store,
        vec![
            Entity::new("Jane Doe", "Person").with_id("p1"),
            Entity::new("Initech", "Organization").with_id("o1"),
        ],
    )
    .await;
    store
        .save_relationship(&Relationship::new("p1", "o1", "EMPLOYED_BY").with_id("r1").with_confidence(0.9))
        .await
        .unwrap();
    store
        .save_relationship(&Relationship::new("p1", "o1", "UNEMPLOYED").with_id("r2").with_confidence(0.6))
        .await
        .unwrap();

    let flaky = Arc::new(FlakyRepository::new(store.clone(), "none").with_broken_document("d2"));
    let detector = ConflictDetector::new(flaky, store.clone(), DetectionConfig::default());

    let report = detector.detect_all_conflicts(None, None).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.pass_errors.len(), 1);
    assert_eq!(report.pass_errors[0].pass, DetectionPass::SourceConflict);
    assert!(report.pass_errors[0].message.contains("d2"));

    assert!(source_conflicts(&report.conflicts).is_empty());
    let count = |kind: ConflictType| report.conflicts.iter().filter(|c| c.conflict_type == kind).count();
    assert_eq!(count(ConflictType::DuplicateEntity), 2);
    assert_eq!(count(ConflictType::ContradictoryRelationship), 1);
    assert_eq!(report.pass_counts.get("duplicate_entity"), Some(&2));
    assert!(!report.pass_counts.contains_key("source_conflict"));
}

#[tokio::test]
async fn test_batch_detection_survives_a_failing_entity() {
    let store = Arc::new(InMemoryStore::new());
    let ids: Vec<String> = (0..10).map(|i| format!("e{}", i)).collect();
    for id in &ids {
        store
            .save_entity(&Entity::new("Acme Corp", "Organization").with_id(id.as_str()))
            .await
            .unwrap();
    }

    let flaky = Arc::new(FlakyRepository::new(store.clone(), "e5"));
    let detector = ConflictDetector::new(flaky, store.clone(), DetectionConfig::default());

    let result = detector.batch_detect_conflicts(&ids).await.unwrap();
    assert_eq!(result.stats.entities_processed, 10);
    assert_eq!(result.stats.errors, 1);
    assert_eq!(result.errors[0].entity_id, "e5");
    assert_eq!(result.stats.conflicts_found, result.conflicts.len());

    // Every pair of the nine readable entities, and nothing touching e5
    let found: BTreeSet<(String, String)> = result
        .conflicts
        .iter()
        .inspect(|c| assert_eq!(c.conflict_type, ConflictType::DuplicateEntity))
        .map(|c| sorted_pair(c.subject.ids()))
        .collect();
    let healthy: Vec<&String> = ids.iter().filter(|id| *id != "e5").collect();
    let expected: BTreeSet<(String, String)> = healthy
        .iter()
        .enumerate()
        .flat_map(|(i, a)| {
            healthy[i + 1..]
                .iter()
                .map(move |b| sorted_pair((a.as_str(), b.as_str())))
        })
        .collect();
    assert_eq!(expected.len(), 36);
    assert_eq!(found, expected);
    assert_eq!(result.conflicts.len(), 36);
}

// ========== Resolution ==========

#[tokio::test]
async fn test_rule_merge_without_ai_call() {
    let store = Arc::new(InMemoryStore::new());
    john_smith_pair(&store).await;
    let conflict = store
        .create_conflict(NewConflict::new(
            ConflictType::DuplicateEntity,
            ConflictSubject::entities("e1", "e2"),
            Severity::Critical,
            0.97,
            "duplicate",
        ))
        .await
        .unwrap();

    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
    });
    let engine = engine(&store).with_suggestions(provider.clone());

    let outcome = engine
        .resolve_automatically(&conflict.id, false, None)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.path, Some(ResolutionPath::Rule));
    assert_eq!(outcome.status, ConflictStatus::ResolvedAuto);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

    let stored = store.require_conflict(&conflict.id).await.unwrap();
    assert_eq!(
        stored.resolution.unwrap().resolution_method,
        ResolutionMethod::MergeEntities
    );
}

#[tokio::test]
async fn test_merge_keeps_primary_scalar() {
    let store = Arc::new(InMemoryStore::new());
    save(
        &store,
        vec![
            Entity::new("Jane Doe", "Person").with_id("e1").with_property("age", "30"),
            Entity::new("Jane Doe", "Person").with_id("e2").with_property("age", "31"),
        ],
    )
    .await;
    let conflict = store
        .create_conflict(NewConflict::new(
            ConflictType::DuplicateEntity,
            ConflictSubject::entities("e1", "e2"),
            Severity::Critical,
            1.0,
            "duplicate",
        ))
        .await
        .unwrap();

    let engine = engine(&store);
    let payload = engine
        .merger()
        .merge_entities(&conflict.id, "e1", "e2", MergeStrategy::MostComplete)
        .await
        .unwrap();

    assert_eq!(payload["primary_entity_id"], "e1");
    let merged = store.require_entity("e1").await.unwrap();
    assert_eq!(merged.properties["age"], "30");
    assert_eq!(store.list_snapshots(&conflict.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_resolution_requires_expert() {
    let store = Arc::new(InMemoryStore::new());
    john_smith_pair(&store).await;
    let detector = detector(&store);
    detect_and_store(&detector).await;
    let conflict = store
        .list_conflicts(&ConflictFilter::new())
        .await
        .unwrap()
        .conflicts
        .remove(0);

    let engine = engine(&store);
    for user in ["viewer", "editor", "stranger"] {
        let err = engine
            .resolve_conflict_manually(
                &conflict.id,
                ManualResolution::new(ResolutionMethod::KeepSource, "looks right"),
                user,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }), "{user}: {err}");
    }
    assert_eq!(
        store.require_conflict(&conflict.id).await.unwrap().status,
        ConflictStatus::Detected
    );

    let outcome = engine
        .resolve_conflict_manually(
            &conflict.id,
            ManualResolution::new(ResolutionMethod::KeepSource, "looks right"),
            "expert",
        )
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.status, ConflictStatus::ResolvedManual);

    let again = engine
        .resolve_conflict_manually(
            &conflict.id,
            ManualResolution::new(ResolutionMethod::KeepTarget, "changed my mind"),
            "expert",
        )
        .await
        .unwrap_err();
    assert!(matches!(again, Error::InvalidTransition { .. }));
}

// ========== Graph Invariants ==========

#[tokio::test]
async fn test_relationship_transfer_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    save(
        &store,
        vec![
            Entity::new("Jane Doe", "Person").with_id("winner"),
            Entity::new("J. Doe", "Person").with_id("loser"),
            Entity::new("Acme Corp", "Organization").with_id("acme"),
        ],
    )
    .await;
    store
        .save_relationship(&Relationship::new("loser", "acme", "WORKS_FOR").with_id("r1"))
        .await
        .unwrap();

    let first = transfer_relationships(store.as_ref(), "loser", "winner").await.unwrap();
    assert_eq!(first.moved, vec!["r1".to_string()]);

    let second = transfer_relationships(store.as_ref(), "loser", "winner").await.unwrap();
    assert!(second.moved.is_empty());
    assert!(second.deduplicated.is_empty());

    let moved = store.require_relationship("r1").await.unwrap();
    assert_eq!(moved.source_entity_id, "winner");
}

#[tokio::test]
async fn test_merge_conserves_relationships() {
    let store = Arc::new(InMemoryStore::new());
    save(
        &store,
        vec![
            Entity::new("Jane Doe", "Person").with_id("e1"),
            Entity::new("Jane Doe", "Person").with_id("e2"),
            Entity::new("Acme Corp", "Organization").with_id("x"),
            Entity::new("Globex", "Organization").with_id("y"),
        ],
    )
    .await;
    for (id, source, target, confidence) in [
        ("r1", "e1", "x", 0.6),
        ("r2", "e2", "x", 0.9),
        ("r3", "e2", "y", 0.8),
    ] {
        store
            .save_relationship(&Relationship::new(source, target, "KNOWS").with_id(id).with_confidence(confidence))
            .await
            .unwrap();
    }
    let before = store.count_relationships(false).await.unwrap();

    let conflict = store
        .create_conflict(NewConflict::new(
            ConflictType::DuplicateEntity,
            ConflictSubject::entities("e1", "e2"),
            Severity::Critical,
            1.0,
            "duplicate",
        ))
        .await
        .unwrap();
    engine(&store)
        .merger()
        .merge_entities(&conflict.id, "e1", "e2", MergeStrategy::PreferSource)
        .await
        .unwrap();

    assert_eq!(store.count_relationships(false).await.unwrap(), before);
    assert_eq!(store.count_relationships(true).await.unwrap(), 2);

    let folded = store.require_relationship("r2").await.unwrap();
    assert!(!folded.is_active);
    assert_eq!(folded.merged_into.as_deref(), Some("r1"));

    let survivor = store.require_relationship("r1").await.unwrap();
    assert!((survivor.confidence - 0.9).abs() < 1e-6);
    assert_eq!(store.require_relationship("r3").await.unwrap().source_entity_id, "e1");
    assert!(store.list_relationships_for_entity("e2", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_merge_locks_far_end_of_transferred_edges() {
    let store = Arc::new(InMemoryStore::new());
    save(
        &store,
        vec![
            Entity::new("Acme Corp", "Organization").with_id("a"),
            Entity::new("ACME Corp", "Organization").with_id("b"),
            Entity::new("Jane Doe", "Person").with_id("c"),
        ],
    )
    .await;
    store
        .save_relationship(&Relationship::new("c", "a", "WORKS_FOR").with_id("r1"))
        .await
        .unwrap();

    let locks = Arc::new(EntityLockManager::new(Duration::from_millis(50)));
    let merger = EntityMerger::new(store.clone(), store.clone(), locks.clone());

    let held = locks.acquire(&["c"]).await.unwrap();
    let err = merger
        .merge_entities("c1", "a", "b", MergeStrategy::PreferTarget)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LockTimeout(ref id) if id == "c"), "{err:?}");
    assert!(store.require_entity("a").await.unwrap().is_active);

    drop(held);
    merger
        .merge_entities("c1", "a", "b", MergeStrategy::PreferTarget)
        .await
        .unwrap();
    let edge = store.require_relationship("r1").await.unwrap();
    assert_eq!((edge.source_entity_id.as_str(), edge.target_entity_id.as_str()), ("c", "b"));
}

#[tokio::test]
async fn test_concurrent_merges_sharing_an_edge_redirect_both_ends() {
    let store = Arc::new(InMemoryStore::new());
    save(
        &store,
        vec![
            Entity::new("Jane Doe", "Person").with_id("a"),
            Entity::new("Jane Doe", "Person").with_id("b"),
            Entity::new("Acme Corp", "Organization").with_id("c"),
            Entity::new("Acme Corp", "Organization").with_id("d"),
        ],
    )
    .await;
    store
        .save_relationship(&Relationship::new("a", "c", "WORKS_FOR").with_id("r1"))
        .await
        .unwrap();

    let merger = EntityMerger::new(
        store.clone(),
        store.clone(),
        Arc::new(EntityLockManager::default()),
    );
    let (first, second) = tokio::join!(
        merger.merge_entities("c1", "a", "b", MergeStrategy::PreferTarget),
        merger.merge_entities("c2", "c", "d", MergeStrategy::PreferTarget),
    );
    first.unwrap();
    second.unwrap();

    let edge = store.require_relationship("r1").await.unwrap();
    assert!(edge.is_active);
    assert_eq!((edge.source_entity_id.as_str(), edge.target_entity_id.as_str()), ("b", "d"));
}

#[tokio::test]
async fn test_merged_duplicate_is_not_redetected() {
    let store = Arc::new(InMemoryStore::new());
    john_smith_pair(&store).await;
    let detector = detector(&store);
    assert_eq!(detect_and_store(&detector).await, 1);

    let conflict = store
        .list_conflicts(&ConflictFilter::new().with_type(ConflictType::DuplicateEntity))
        .await
        .unwrap()
        .conflicts
        .remove(0);
    let outcome = engine(&store)
        .resolve_automatically(&conflict.id, false, None)
        .await
        .unwrap();
    assert!(outcome.success);

    let fresh_conflicts = Arc::new(InMemoryStore::new());
    let rerun = ConflictDetector::new(store.clone(), fresh_conflicts, DetectionConfig::default())
        .detect_all_conflicts(None, None)
        .await
        .unwrap();
    assert!(rerun.conflicts.is_empty());
    assert_eq!(store.count_entities(true).await.unwrap(), 1);
}

#[tokio::test]
async fn test_keep_both_suppresses_redetection() {
    let store = Arc::new(InMemoryStore::new());
    john_smith_pair(&store).await;
    let detector = detector(&store);
    detect_and_store(&detector).await;
    let conflict = store
        .list_conflicts(&ConflictFilter::new())
        .await
        .unwrap()
        .conflicts
        .remove(0);

    engine(&store)
        .resolve_conflict_manually(
            &conflict.id,
            ManualResolution::new(ResolutionMethod::KeepBoth, "father and son"),
            "expert",
        )
        .await
        .unwrap();

    let source = store.require_entity("e1").await.unwrap();
    assert!(source.is_active);
    assert!(source.is_distinct_from("e2"));

    let fresh_conflicts = Arc::new(InMemoryStore::new());
    let rerun = ConflictDetector::new(store.clone(), fresh_conflicts, DetectionConfig::default())
        .detect_all_conflicts(None, None)
        .await
        .unwrap();
    assert!(rerun.conflicts.is_empty());
}
