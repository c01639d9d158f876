//! Database migrations
//!
//! Schema versions for the knowledge graph and conflict store. Migrations
//! are applied in order on connection and recorded in `_migrations`.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Knowledge graph
const MIGRATION_V1: &str = r#"
    -- Source documents (provenance)
    CREATE TABLE IF NOT EXISTS source_documents (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        source_type TEXT NOT NULL DEFAULT '',
        reliability REAL CHECK (reliability IS NULL OR (reliability >= 0.0 AND reliability <= 1.0)),
        created_at TEXT NOT NULL
    );

    -- Entities; superseded rows stay with is_active = 0
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY NOT NULL,
        text TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        confidence REAL NOT NULL DEFAULT 0.5,
        embedding TEXT,
        is_verified INTEGER NOT NULL DEFAULT 0,
        source_document_id TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        superseded_by TEXT,
        aliases TEXT NOT NULL DEFAULT '[]',
        distinct_from TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_entities_active ON entities(is_active);
    CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
    CREATE INDEX IF NOT EXISTS idx_entities_text ON entities(lower(text));
    CREATE INDEX IF NOT EXISTS idx_entities_document ON entities(source_document_id);
    CREATE INDEX IF NOT EXISTS idx_entities_created ON entities(created_at, id);

    -- Directed, typed relationships
    CREATE TABLE IF NOT EXISTS relationships (
        id TEXT PRIMARY KEY NOT NULL,
        source_entity_id TEXT NOT NULL,
        target_entity_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        confidence REAL NOT NULL DEFAULT 0.5,
        is_active INTEGER NOT NULL DEFAULT 1,
        merged_into TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_entity_id);
    CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_entity_id);
    CREATE INDEX IF NOT EXISTS idx_relationships_active ON relationships(is_active);
"#;

/// Migration 2: Conflicts and rollback snapshots
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS conflicts (
        id TEXT PRIMARY KEY NOT NULL,
        conflict_type TEXT NOT NULL CHECK (conflict_type IN (
            'duplicate_entity', 'contradictory_relationship', 'attribute_mismatch',
            'temporal_conflict', 'source_conflict'
        )),
        severity TEXT NOT NULL CHECK (severity IN ('low', 'medium', 'high', 'critical')),
        status TEXT NOT NULL DEFAULT 'detected' CHECK (status IN (
            'detected', 'under_review', 'resolved_auto', 'resolved_manual', 'rejected', 'escalated'
        )),
        confidence_score REAL NOT NULL,
        subject_kind TEXT NOT NULL CHECK (subject_kind IN ('entities', 'relationships')),
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        conflicting_attributes TEXT,
        context_data TEXT,
        detected_by TEXT NOT NULL,
        assigned_to TEXT,
        resolution TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(status);
    CREATE INDEX IF NOT EXISTS idx_conflicts_type ON conflicts(conflict_type);
    CREATE INDEX IF NOT EXISTS idx_conflicts_severity ON conflicts(severity);
    CREATE INDEX IF NOT EXISTS idx_conflicts_assigned ON conflicts(assigned_to);
    CREATE INDEX IF NOT EXISTS idx_conflicts_created ON conflicts(created_at);

    CREATE TABLE IF NOT EXISTS rollback_snapshots (
        id TEXT PRIMARY KEY NOT NULL,
        conflict_id TEXT NOT NULL REFERENCES conflicts(id) ON DELETE CASCADE,
        action TEXT NOT NULL,
        entities TEXT NOT NULL DEFAULT '[]',
        relationships TEXT NOT NULL DEFAULT '[]',
        captured_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_rollback_snapshots_conflict ON rollback_snapshots(conflict_id);
"#;

/// Ordered schema steps: version, label, SQL
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (1, "knowledge graph", MIGRATION_V1),
    (2, "conflicts and rollback snapshots", MIGRATION_V2),
];

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every step newer than the recorded version
///
/// Each step runs in its own transaction together with its `_migrations`
/// row, so a failed step leaves the previous version intact.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let from = applied_version(pool).await?;
    if from >= CURRENT_VERSION {
        tracing::debug!(version = from, "Schema up to date");
        return Ok(());
    }

    for &(version, label, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > from) {
        tracing::info!(version, label, "Applying schema migration");
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    tracing::info!(from, to = CURRENT_VERSION, "Schema migrated");
    Ok(())
}

/// Where the schema stands relative to this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub needs_migration: bool,
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = applied_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = memory_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = memory_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();

        for table in [
            "source_documents",
            "entities",
            "relationships",
            "conflicts",
            "rollback_snapshots",
        ] {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_conflict_status_is_checked() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();

        let result = sqlx::query(
            r#"INSERT INTO conflicts (id, conflict_type, severity, status, confidence_score,
                subject_kind, source_id, target_id, detected_by, created_at, updated_at)
               VALUES ('c1', 'duplicate_entity', 'high', 'pending', 0.9,
                'entities', 'a', 'b', 'system', '', '')"#,
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
