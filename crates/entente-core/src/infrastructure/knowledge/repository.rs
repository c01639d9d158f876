//! SQLite implementation of the KnowledgeGraphRepository
//!
//! JSON-valued columns (properties, embeddings, aliases, disambiguation
//! notes) are stored as text. Timestamps are fixed-width RFC 3339 so that
//! ordering by the text column matches ordering by time.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::domain::knowledge::{
    Entity, EntityQuery, KnowledgeGraphRepository, Relationship, SourceDocument,
};
use crate::error::Result;

/// SQLite implementation of the knowledge graph repository
#[derive(Clone)]
pub struct SqliteKnowledgeGraphRepository {
    pool: SqlitePool,
}

impl SqliteKnowledgeGraphRepository {
    /// Create a new SQLite knowledge graph repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Fixed-width UTC timestamp
pub(crate) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl KnowledgeGraphRepository for SqliteKnowledgeGraphRepository {
    // ========== Entity Operations ==========

    async fn save_entity(&self, entity: &Entity) -> Result<()> {
        let properties_json = serde_json::to_string(&entity.properties)?;
        let embedding_json = entity
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let aliases_json = serde_json::to_string(&entity.aliases)?;
        let distinct_json = serde_json::to_string(&entity.distinct_from)?;

        sqlx::query(
            r#"
            INSERT INTO entities (
                id, text, entity_type, properties, confidence, embedding, is_verified,
                source_document_id, is_active, superseded_by, aliases, distinct_from,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                text = excluded.text,
                entity_type = excluded.entity_type,
                properties = excluded.properties,
                confidence = excluded.confidence,
                embedding = excluded.embedding,
                is_verified = excluded.is_verified,
                source_document_id = excluded.source_document_id,
                is_active = excluded.is_active,
                superseded_by = excluded.superseded_by,
                aliases = excluded.aliases,
                distinct_from = excluded.distinct_from,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.text)
        .bind(&entity.entity_type)
        .bind(&properties_json)
        .bind(entity.confidence)
        .bind(&embedding_json)
        .bind(entity.is_verified)
        .bind(&entity.source_document_id)
        .bind(entity.is_active)
        .bind(&entity.superseded_by)
        .bind(&aliases_json)
        .bind(&distinct_json)
        .bind(timestamp(&entity.created_at))
        .bind(timestamp(&entity.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(entity_id = %entity.id, text = %entity.text, active = entity.is_active, "Entity saved");
        Ok(())
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let row: Option<EntityRow> = sqlx::query_as("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_entity()).transpose()
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
        if query.ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM entities WHERE 1 = 1");
        if query.active_only {
            builder.push(" AND is_active = 1");
        }
        if let Some(entity_type) = &query.entity_type {
            builder.push(" AND entity_type = ").push_bind(entity_type);
        }
        if let Some(ids) = &query.ids {
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY created_at, id LIMIT ");
        builder.push_bind(query.limit.map(|l| l as i64).unwrap_or(-1));
        builder.push(" OFFSET ").push_bind(query.offset as i64);

        let rows: Vec<EntityRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    async fn count_entities(&self, active_only: bool) -> Result<u64> {
        let sql = if active_only {
            "SELECT COUNT(*) FROM entities WHERE is_active = 1"
        } else {
            "SELECT COUNT(*) FROM entities"
        };
        let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    // ========== Relationship Operations ==========

    async fn save_relationship(&self, relationship: &Relationship) -> Result<()> {
        let properties_json = serde_json::to_string(&relationship.properties)?;

        sqlx::query(
            r#"
            INSERT INTO relationships (
                id, source_entity_id, target_entity_id, relationship_type, properties,
                confidence, is_active, merged_into, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_entity_id = excluded.source_entity_id,
                target_entity_id = excluded.target_entity_id,
                relationship_type = excluded.relationship_type,
                properties = excluded.properties,
                confidence = excluded.confidence,
                is_active = excluded.is_active,
                merged_into = excluded.merged_into,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&relationship.id)
        .bind(&relationship.source_entity_id)
        .bind(&relationship.target_entity_id)
        .bind(&relationship.relationship_type)
        .bind(&properties_json)
        .bind(relationship.confidence)
        .bind(relationship.is_active)
        .bind(&relationship.merged_into)
        .bind(timestamp(&relationship.created_at))
        .bind(timestamp(&relationship.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(
            relationship_id = %relationship.id,
            source = %relationship.source_entity_id,
            target = %relationship.target_entity_id,
            rel_type = %relationship.relationship_type,
            "Relationship saved"
        );
        Ok(())
    }

    async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
        let row: Option<RelationshipRow> =
            sqlx::query_as("SELECT * FROM relationships WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|r| r.into_relationship()).transpose()
    }

    async fn list_relationships_for_entity(
        &self,
        entity_id: &str,
        active_only: bool,
    ) -> Result<Vec<Relationship>> {
        let sql = if active_only {
            r#"
            SELECT * FROM relationships
            WHERE (source_entity_id = ? OR target_entity_id = ?) AND is_active = 1
            ORDER BY created_at, id
            "#
        } else {
            r#"
            SELECT * FROM relationships
            WHERE source_entity_id = ? OR target_entity_id = ?
            ORDER BY created_at, id
            "#
        };

        let rows: Vec<RelationshipRow> = sqlx::query_as(sql)
            .bind(entity_id)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    async fn list_relationships(
        &self,
        active_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Relationship>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM relationships");
        if active_only {
            builder.push(" WHERE is_active = 1");
        }
        builder.push(" ORDER BY created_at, id LIMIT ");
        builder.push_bind(limit.map(|l| l as i64).unwrap_or(-1));

        let rows: Vec<RelationshipRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    async fn count_relationships(&self, active_only: bool) -> Result<u64> {
        let sql = if active_only {
            "SELECT COUNT(*) FROM relationships WHERE is_active = 1"
        } else {
            "SELECT COUNT(*) FROM relationships"
        };
        let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    // ========== Source Documents ==========

    async fn save_document(&self, document: &SourceDocument) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_documents (id, title, source_type, reliability, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                source_type = excluded.source_type,
                reliability = excluded.reliability
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.source_type)
        .bind(document.reliability)
        .bind(timestamp(&document.created_at))
        .execute(&self.pool)
        .await?;

        debug!(document_id = %document.id, "Source document saved");
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<SourceDocument>> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT * FROM source_documents WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(DocumentRow::into_document))
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    text: String,
    entity_type: String,
    properties: String,
    confidence: f32,
    embedding: Option<String>,
    is_verified: bool,
    source_document_id: Option<String>,
    is_active: bool,
    superseded_by: Option<String>,
    aliases: String,
    distinct_from: String,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        Ok(Entity {
            properties: serde_json::from_str(&self.properties)?,
            embedding: self
                .embedding
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            aliases: serde_json::from_str(&self.aliases).unwrap_or_default(),
            distinct_from: serde_json::from_str(&self.distinct_from).unwrap_or_default(),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            id: self.id,
            text: self.text,
            entity_type: self.entity_type,
            confidence: self.confidence,
            is_verified: self.is_verified,
            source_document_id: self.source_document_id,
            is_active: self.is_active,
            superseded_by: self.superseded_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    id: String,
    source_entity_id: String,
    target_entity_id: String,
    relationship_type: String,
    properties: String,
    confidence: f32,
    is_active: bool,
    merged_into: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RelationshipRow {
    fn into_relationship(self) -> Result<Relationship> {
        Ok(Relationship {
            properties: serde_json::from_str(&self.properties)?,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            id: self.id,
            source_entity_id: self.source_entity_id,
            target_entity_id: self.target_entity_id,
            relationship_type: self.relationship_type,
            confidence: self.confidence,
            is_active: self.is_active,
            merged_into: self.merged_into,
        })
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: String,
    title: String,
    source_type: String,
    reliability: Option<f32>,
    created_at: String,
}

impl DocumentRow {
    fn into_document(self) -> SourceDocument {
        SourceDocument {
            created_at: parse_timestamp(&self.created_at),
            id: self.id,
            title: self.title,
            source_type: self.source_type,
            reliability: self.reliability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteKnowledgeGraphRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        SqliteKnowledgeGraphRepository::new(pool)
    }

    #[tokio::test]
    async fn test_save_and_get_entity() {
        let repo = setup_test_db().await;

        let mut entity = Entity::new("John Smith", "Person")
            .with_property("age", json!(30))
            .with_embedding(vec![0.25, 0.5])
            .with_source_document("doc-1")
            .with_confidence(0.8);
        entity.add_alias("J. Smith");
        entity.mark_distinct_from("other", "different John Smith");

        repo.save_entity(&entity).await.unwrap();

        let retrieved = repo.get_entity(&entity.id).await.unwrap().unwrap();
        assert_eq!(retrieved.text, "John Smith");
        assert_eq!(retrieved.properties["age"], json!(30));
        assert_eq!(retrieved.embedding, Some(vec![0.25, 0.5]));
        assert_eq!(retrieved.aliases, vec!["J. Smith".to_string()]);
        assert!(retrieved.is_distinct_from("other"));
        assert!(retrieved.is_active);
    }

    #[tokio::test]
    async fn test_supersede_round_trip() {
        let repo = setup_test_db().await;
        let mut entity = Entity::new("Acme", "Organization").with_id("e1");
        repo.save_entity(&entity).await.unwrap();

        entity.supersede("e2");
        repo.save_entity(&entity).await.unwrap();

        let retrieved = repo.get_entity("e1").await.unwrap().unwrap();
        assert!(!retrieved.is_active);
        assert_eq!(retrieved.superseded_by.as_deref(), Some("e2"));
        assert_eq!(repo.count_entities(true).await.unwrap(), 0);
        assert_eq!(repo.count_entities(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_entities_query() {
        let repo = setup_test_db().await;
        for (id, entity_type) in [("a", "Person"), ("b", "Person"), ("c", "Place")] {
            repo.save_entity(&Entity::new(id.to_uppercase(), entity_type).with_id(id))
                .await
                .unwrap();
        }

        let people = repo
            .list_entities(&EntityQuery::active().with_type("Person"))
            .await
            .unwrap();
        assert_eq!(people.len(), 2);

        let picked = repo
            .list_entities(&EntityQuery::default().with_ids(vec!["a".into(), "c".into()]))
            .await
            .unwrap();
        assert_eq!(picked.len(), 2);

        let none = repo
            .list_entities(&EntityQuery::default().with_ids(Vec::new()))
            .await
            .unwrap();
        assert!(none.is_empty());

        let page = repo
            .list_entities(&EntityQuery::default().with_limit(1).with_offset(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_relationships_for_entity() {
        let repo = setup_test_db().await;
        let r1 = Relationship::new("a", "b", "KNOWS").with_id("r1");
        let mut r2 = Relationship::new("c", "a", "MANAGES").with_id("r2");
        let r3 = Relationship::new("b", "c", "KNOWS").with_id("r3");
        for rel in [&r1, &r2, &r3] {
            repo.save_relationship(rel).await.unwrap();
        }

        assert_eq!(repo.list_relationships_for_entity("a", true).await.unwrap().len(), 2);

        r2.deactivate(Some("r1"));
        repo.save_relationship(&r2).await.unwrap();
        let active = repo.list_relationships_for_entity("a", true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "r1");

        let all = repo.list_relationships_for_entity("a", false).await.unwrap();
        assert_eq!(all.len(), 2);
        let folded = all.iter().find(|r| r.id == "r2").unwrap();
        assert_eq!(folded.merged_into.as_deref(), Some("r1"));

        assert_eq!(repo.count_relationships(true).await.unwrap(), 2);
        assert_eq!(repo.list_relationships(false, Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_documents() {
        let repo = setup_test_db().await;
        let document = SourceDocument::new("Annual report", "pdf")
            .with_id("doc-1")
            .with_reliability(0.9);
        repo.save_document(&document).await.unwrap();

        let retrieved = repo.get_document("doc-1").await.unwrap().unwrap();
        assert_eq!(retrieved.title, "Annual report");
        assert_eq!(retrieved.reliability, Some(0.9));
        assert!(repo.get_document("missing").await.unwrap().is_none());
    }
}
