//! Wiring of repositories, providers and services from configuration

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::access::{PermissionChecker, StaticPermissionChecker};
use crate::domain::conflict::{ConflictDetector, ConflictRepository};
use crate::domain::knowledge::{KnowledgeGraphRepository, KnowledgeGraphService};
use crate::domain::locking::EntityLockManager;
use crate::domain::quality::QualityAggregator;
use crate::domain::resolution::ResolutionEngine;
use crate::infrastructure::conflict::SqliteConflictRepository;
use crate::infrastructure::knowledge::SqliteKnowledgeGraphRepository;
use crate::llm::LlmClient;
use crate::storage::Database;

/// Shared handles every command works against
///
/// Services are cheap to build, so each accessor constructs a fresh one over
/// the shared repositories and lock manager.
pub struct AppContext {
    config: Config,
    database: Database,
    knowledge: Arc<dyn KnowledgeGraphRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    permissions: Arc<dyn PermissionChecker>,
    locks: Arc<EntityLockManager>,
    llm: Option<Arc<LlmClient>>,
}

impl AppContext {
    /// Open the configured database and wire everything up
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let path = config.storage.resolved_database_path()?;
        let database = Database::open(&path)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        info!(path = %path.display(), "Database ready");
        Self::with_database(config, database)
    }

    /// Wire services over an already-open database
    pub fn with_database(config: Config, database: Database) -> anyhow::Result<Self> {
        let pool = database.pool().clone();
        let llm = match config.llm.resolved_api_key()? {
            Some(key) => Some(Arc::new(LlmClient::new(config.llm.clone(), key)?)),
            None => {
                warn!("No LLM API key set; AI suggestions and embeddings are disabled");
                None
            }
        };

        Ok(Self {
            knowledge: Arc::new(SqliteKnowledgeGraphRepository::new(pool.clone())),
            conflicts: Arc::new(SqliteConflictRepository::new(pool)),
            permissions: Arc::new(StaticPermissionChecker::from_config(
                &config.permission_table(),
            )),
            locks: Arc::new(EntityLockManager::new(config.resolution.lock_timeout())),
            llm,
            database,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn knowledge(&self) -> Arc<dyn KnowledgeGraphRepository> {
        self.knowledge.clone()
    }

    pub fn conflicts(&self) -> Arc<dyn ConflictRepository> {
        self.conflicts.clone()
    }

    /// Whether an LLM provider is configured
    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn graph_service(&self) -> KnowledgeGraphService {
        KnowledgeGraphService::new(self.knowledge.clone(), self.permissions.clone())
    }

    pub fn detector(&self) -> ConflictDetector {
        let detector = ConflictDetector::new(
            self.knowledge.clone(),
            self.conflicts.clone(),
            self.config.detection.clone(),
        );
        match &self.llm {
            Some(llm) if self.config.detection.use_embeddings => {
                detector.with_embeddings(llm.clone())
            }
            _ => detector,
        }
    }

    pub fn resolution_engine(&self) -> ResolutionEngine {
        let engine = ResolutionEngine::new(
            self.knowledge.clone(),
            self.conflicts.clone(),
            self.permissions.clone(),
            self.locks.clone(),
            self.config.resolution.clone(),
        );
        match &self.llm {
            Some(llm) => engine.with_suggestions(llm.clone()),
            None => engine,
        }
    }

    pub fn quality(&self) -> QualityAggregator {
        QualityAggregator::new(
            self.knowledge.clone(),
            self.conflicts.clone(),
            self.config.quality.clone(),
        )
    }
}
