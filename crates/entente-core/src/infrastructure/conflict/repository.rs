//! SQLite implementation of the ConflictRepository

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::domain::conflict::{
    Conflict, ConflictFilter, ConflictKey, ConflictPage, ConflictRepository, ConflictStats,
    ConflictStatus, ConflictSubject, ConflictType, RollbackSnapshot, Severity,
};
use crate::error::{Error, Result};
use crate::infrastructure::knowledge::{parse_timestamp, timestamp};

/// SQLite implementation of the conflict repository
#[derive(Clone)]
pub struct SqliteConflictRepository {
    pool: SqlitePool,
}

impl SqliteConflictRepository {
    /// Create a new SQLite conflict repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Append the filter's WHERE clause
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ConflictFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(conflict_type) = filter.conflict_type {
        builder.push(" AND conflict_type = ").push_bind(conflict_type.as_str());
    }
    if let Some(severity) = filter.severity {
        builder.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(assigned_to) = &filter.assigned_to {
        builder.push(" AND assigned_to = ").push_bind(assigned_to.clone());
    }
}

fn parse_enum<T>(value: &str, what: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| Error::StorageError(format!("Invalid {}: {}", what, value)))
}

#[async_trait]
impl ConflictRepository for SqliteConflictRepository {
    async fn save_conflict(&self, conflict: &Conflict) -> Result<()> {
        let (subject_kind, source_id, target_id) = match &conflict.subject {
            ConflictSubject::Entities {
                source_entity_id,
                target_entity_id,
            } => ("entities", source_entity_id, target_entity_id),
            ConflictSubject::Relationships {
                source_relationship_id,
                target_relationship_id,
            } => ("relationships", source_relationship_id, target_relationship_id),
        };
        let attributes_json = conflict
            .conflicting_attributes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let context_json = conflict
            .context_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let resolution_json = conflict
            .resolution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO conflicts (
                id, conflict_type, severity, status, confidence_score, subject_kind,
                source_id, target_id, description, conflicting_attributes, context_data,
                detected_by, assigned_to, resolution, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                severity = excluded.severity,
                status = excluded.status,
                confidence_score = excluded.confidence_score,
                description = excluded.description,
                conflicting_attributes = excluded.conflicting_attributes,
                context_data = excluded.context_data,
                assigned_to = excluded.assigned_to,
                resolution = excluded.resolution,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conflict.id)
        .bind(conflict.conflict_type.as_str())
        .bind(conflict.severity.as_str())
        .bind(conflict.status.as_str())
        .bind(conflict.confidence_score)
        .bind(subject_kind)
        .bind(source_id)
        .bind(target_id)
        .bind(&conflict.description)
        .bind(&attributes_json)
        .bind(&context_json)
        .bind(&conflict.detected_by)
        .bind(&conflict.assigned_to)
        .bind(&resolution_json)
        .bind(timestamp(&conflict.created_at))
        .bind(timestamp(&conflict.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(conflict_id = %conflict.id, status = %conflict.status, "Conflict saved");
        Ok(())
    }

    async fn get_conflict(&self, id: &str) -> Result<Option<Conflict>> {
        let row: Option<ConflictRow> = sqlx::query_as("SELECT * FROM conflicts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_conflict()).transpose()
    }

    async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<ConflictPage> {
        let total = self.count_conflicts(filter).await?;
        let limit = filter.page_size();

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM conflicts");
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at DESC, id LIMIT ");
        builder.push_bind(limit as i64);
        builder.push(" OFFSET ").push_bind(filter.skip as i64);

        let rows: Vec<ConflictRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let conflicts = rows
            .into_iter()
            .map(|r| r.into_conflict())
            .collect::<Result<Vec<_>>>()?;

        Ok(ConflictPage {
            conflicts,
            total,
            limit,
            skip: filter.skip,
        })
    }

    async fn count_conflicts(&self, filter: &ConflictFilter) -> Result<u64> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM conflicts");
        push_filter(&mut builder, filter);

        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn conflict_keys(&self) -> Result<HashSet<ConflictKey>> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT conflict_type, source_id, target_id FROM conflicts")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|(conflict_type, a, b)| -> Result<ConflictKey> {
                let conflict_type = parse_enum(conflict_type, "conflict type", ConflictType::parse)?;
                Ok(ConflictKey::new(conflict_type, a, b))
            })
            .collect()
    }

    async fn stats(&self) -> Result<ConflictStats> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT status, conflict_type, severity, COUNT(*)
            FROM conflicts
            GROUP BY status, conflict_type, severity
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ConflictStats::default();
        for (status, conflict_type, severity, count) in rows {
            stats.record(
                parse_enum(&status, "conflict status", ConflictStatus::parse)?,
                parse_enum(&conflict_type, "conflict type", ConflictType::parse)?,
                parse_enum(&severity, "severity", Severity::parse)?,
                count as u64,
            );
        }
        Ok(stats)
    }

    async fn save_snapshot(&self, snapshot: &RollbackSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rollback_snapshots (id, conflict_id, action, entities, relationships, captured_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.conflict_id)
        .bind(&snapshot.action)
        .bind(serde_json::to_string(&snapshot.entities)?)
        .bind(serde_json::to_string(&snapshot.relationships)?)
        .bind(timestamp(&snapshot.captured_at))
        .execute(&self.pool)
        .await?;

        debug!(snapshot_id = %snapshot.id, conflict_id = %snapshot.conflict_id, "Rollback snapshot saved");
        Ok(())
    }

    async fn list_snapshots(&self, conflict_id: &str) -> Result<Vec<RollbackSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT * FROM rollback_snapshots WHERE conflict_id = ? ORDER BY captured_at, id",
        )
        .bind(conflict_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_snapshot()).collect()
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct ConflictRow {
    id: String,
    conflict_type: String,
    severity: String,
    status: String,
    confidence_score: f32,
    subject_kind: String,
    source_id: String,
    target_id: String,
    description: String,
    conflicting_attributes: Option<String>,
    context_data: Option<String>,
    detected_by: String,
    assigned_to: Option<String>,
    resolution: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ConflictRow {
    fn into_conflict(self) -> Result<Conflict> {
        let subject = match self.subject_kind.as_str() {
            "entities" => ConflictSubject::entities(self.source_id, self.target_id),
            "relationships" => ConflictSubject::relationships(self.source_id, self.target_id),
            other => {
                return Err(Error::StorageError(format!("Invalid subject kind: {}", other)));
            }
        };

        Ok(Conflict {
            conflict_type: parse_enum(&self.conflict_type, "conflict type", ConflictType::parse)?,
            severity: parse_enum(&self.severity, "severity", Severity::parse)?,
            status: parse_enum(&self.status, "conflict status", ConflictStatus::parse)?,
            conflicting_attributes: self
                .conflicting_attributes
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            context_data: self
                .context_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            resolution: self
                .resolution
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            id: self.id,
            confidence_score: self.confidence_score,
            subject,
            description: self.description,
            detected_by: self.detected_by,
            assigned_to: self.assigned_to,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: String,
    conflict_id: String,
    action: String,
    entities: String,
    relationships: String,
    captured_at: String,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<RollbackSnapshot> {
        Ok(RollbackSnapshot {
            entities: serde_json::from_str(&self.entities)?,
            relationships: serde_json::from_str(&self.relationships)?,
            captured_at: parse_timestamp(&self.captured_at),
            id: self.id,
            conflict_id: self.conflict_id,
            action: self.action,
        })
    }
}
