//! CLI integration tests for entente
//!
//! Tests the entente CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const GRAPH: &str = r#"{
  "documents": [
    {"id": "d1", "title": "HR export", "source_type": "database", "reliability": 0.9,
     "created_at": "2024-01-01T00:00:00Z"}
  ],
  "entities": [
    {"id": "e1", "text": "John Smith", "entity_type": "Person", "confidence": 0.9,
     "properties": {"age": "30"}, "source_document_id": "d1",
     "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"},
    {"id": "e2", "text": "john smith", "entity_type": "Person", "confidence": 0.8,
     "properties": {"age": "30"}, "source_document_id": "d1",
     "created_at": "2024-01-02T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z"},
    {"id": "e3", "text": "Acme Corp", "entity_type": "Organization", "confidence": 0.95,
     "created_at": "2024-01-03T00:00:00Z", "updated_at": "2024-01-03T00:00:00Z"}
  ],
  "relationships": [
    {"id": "r1", "source_entity_id": "e2", "target_entity_id": "e3",
     "relationship_type": "WORKS_FOR", "confidence": 0.7,
     "created_at": "2024-01-04T00:00:00Z", "updated_at": "2024-01-04T00:00:00Z"}
  ]
}"#;

/// Isolated config dir, database and graph file
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("graph.json"), GRAPH).unwrap();
        Self { dir }
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("entente").unwrap();
        cmd.current_dir(self.dir.path())
            .env("ENTENTE_CONFIG_DIR", self.dir.path().join("config"))
            .env_remove("ENTENTE_API_KEY")
            .env_remove("OPENROUTER_API_KEY")
            .arg("--database")
            .arg(self.dir.path().join("entente.db"));
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).args(["--format", "json"]).output().unwrap();
        assert!(
            output.status.success(),
            "{:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn import_and_detect(&self) {
        self.cmd()
            .args(["import", "graph.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("3 entities"));
        self.cmd().arg("detect").assert().success();
    }
}

#[test]
fn test_config_set_get_round_trip() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["config", "set", "detection.duplicate_threshold", "0.9"])
        .assert()
        .success();
    ws.cmd()
        .args(["config", "get", "detection.duplicate_threshold"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.9"));

    ws.cmd()
        .args(["config", "set", "detection.duplicate_threshold", "1.5"])
        .assert()
        .failure();
}

#[test]
fn test_config_rejects_unknown_role() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["config", "set", "permissions.alice", "overlord"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown role"));
}

#[test]
fn test_detect_dry_run_stores_nothing() {
    let ws = Workspace::new();
    ws.cmd().args(["import", "graph.json"]).assert().success();

    let report = ws.json(&["detect", "--dry-run"]);
    assert!(!report["conflicts"].as_array().unwrap().is_empty());

    let page = ws.json(&["conflicts", "list"]);
    assert_eq!(page["total"], 0);
}

#[test]
fn test_detect_then_auto_resolve_duplicate() {
    let ws = Workspace::new();
    ws.import_and_detect();

    let page = ws.json(&["conflicts", "list", "--type", "duplicate_entity"]);
    assert_eq!(page["total"], 1);
    let conflict = &page["conflicts"][0];
    assert_eq!(conflict["severity"], "critical");
    let id = conflict["id"].as_str().unwrap().to_string();

    let outcome = ws.json(&["resolve", "auto", &id]);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["status"], "resolved_auto");

    let shown = ws.json(&["conflicts", "show", &id]);
    assert_eq!(shown["resolution"]["resolution_method"], "merge_entities");

    // Resolved conflicts are immutable
    ws.cmd()
        .args(["resolve", "auto", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot move"));
}

#[test]
fn test_manual_resolution_needs_configured_role() {
    let ws = Workspace::new();
    ws.import_and_detect();

    let page = ws.json(&["conflicts", "list", "--type", "duplicate_entity"]);
    let id = page["conflicts"][0]["id"].as_str().unwrap().to_string();

    let manual = [
        "resolve",
        "manual",
        id.as_str(),
        "--method",
        "keep_both",
        "--expert",
        "alice",
        "--reasoning",
        "father and son",
    ];

    ws.cmd()
        .args(manual)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Permission denied"));

    ws.cmd()
        .args(["config", "set", "permissions.alice", "expert"])
        .assert()
        .success();

    let outcome = ws.json(&manual);
    assert_eq!(outcome["status"], "resolved_manual");
}

#[test]
fn test_reject_requires_admin() {
    let ws = Workspace::new();
    ws.import_and_detect();
    let page = ws.json(&["conflicts", "list"]);
    let id = page["conflicts"][0]["id"].as_str().unwrap().to_string();

    ws.cmd()
        .args(["config", "set", "permissions.root", "admin"])
        .assert()
        .success();

    let rejected = ws.json(&["conflicts", "reject", &id, "--by", "root", "--reason", "noise"]);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["context_data"]["rejection"]["by"], "root");

    let stats = ws.json(&["conflicts", "stats"]);
    assert_eq!(stats["by_status"]["rejected"], 1);
}

#[test]
fn test_suggest_without_provider_uses_rules() {
    let ws = Workspace::new();
    ws.import_and_detect();
    let page = ws.json(&["conflicts", "list", "--type", "duplicate_entity"]);
    let id = page["conflicts"][0]["id"].as_str().unwrap().to_string();

    let suggestions = ws.json(&["resolve", "suggest", &id]);
    assert_eq!(suggestions[0]["resolution_method"], "merge_entities");
    assert_eq!(suggestions[0]["source"], "rule");
}

#[test]
fn test_quality_report() {
    let ws = Workspace::new();
    ws.import_and_detect();

    let report = ws.json(&["quality"]);
    let score = report["overall_score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
    assert_eq!(report["dimensions"].as_array().unwrap().len(), 5);
    assert!(report["conflict_summary"]["open"].as_u64().unwrap() >= 1);

    ws.cmd()
        .arg("quality")
        .assert()
        .success()
        .stdout(predicate::str::contains("Overall score"));
}

#[test]
fn test_show_unknown_conflict_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["conflicts", "show", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
