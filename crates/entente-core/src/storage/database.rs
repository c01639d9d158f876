//! SQLite pool for the knowledge graph and conflict store
//!
//! Both SQLite repositories share one pool. The schema is migrated when the
//! pool opens, so a fresh file is usable immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::storage::migrations;

const FILE_POOL_SIZE: u32 = 5;

/// How long a writer waits on a locked database before failing
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to open the store
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_connections: FILE_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// In-memory store on a single connection
    ///
    /// Every SQLite memory connection is its own database, so the pool must
    /// never open a second one.
    pub fn memory() -> Self {
        Self {
            path: None,
            max_connections: 1,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::new()
                .in_memory(true)
                .journal_mode(SqliteJournalMode::Memory),
        };
        options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }
}

/// Migrated connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl Database {
    /// Connect and bring the schema up to date
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.as_deref().and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options())
            .await
            .with_context(|| match &config.path {
                Some(path) => format!("Failed to open knowledge store {}", path.display()),
                None => "Failed to open in-memory knowledge store".to_string(),
            })?;

        migrations::run_migrations(&pool)
            .await
            .context("Failed to migrate knowledge store schema")?;

        tracing::debug!(path = ?config.path, "Knowledge store ready");
        Ok(Self {
            pool,
            path: config.path,
        })
    }

    /// Open (creating if needed) the store at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::connect(DatabaseConfig::file(path)).await
    }

    /// Throwaway store for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        Self::connect(DatabaseConfig::memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Backing file, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Applied schema version
    pub async fn schema_version(&self) -> Result<i32> {
        Ok(migrations::migration_status(&self.pool).await?.current_version)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
