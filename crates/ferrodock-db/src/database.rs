//! Database connection and table management.
//!
//! Provides a unified interface for SQLite operations.

use crate::error::Result;
use crate::schema;
use ferrodock_common::JobStatus;
use sqlx::{Sqlite, Transaction};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Main database handle.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    url: String,
}

impl Database {
    /// Open or create a database at the given sqlx URL (`sqlite://path.db`).
    pub async fn open(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(url, "Opened job database");
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Open a private in-memory database.
    ///
    /// SQLite gives each connection its own memory database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            url: "sqlite::memory:".to_string(),
        })
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start a transaction that takes the write lock up front.
    ///
    /// A deferred transaction that reads before writing cannot upgrade its
    /// lock while another writer holds it, and SQLite fails it with
    /// `SQLITE_BUSY` without consulting the busy timeout. `BEGIN IMMEDIATE`
    /// waits on the timeout instead.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Create the jobs/poses tables and their indexes if they don't exist.
    pub async fn initialize(&self) -> Result<()> {
        for statement in schema::SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema initialized");
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Get table statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut jobs_by_status = HashMap::new();
        let mut jobs = 0;
        for (status, count) in rows {
            let count = count.max(0) as u64;
            jobs += count;
            if let Ok(status) = status.parse::<JobStatus>() {
                jobs_by_status.insert(status, count);
            }
        }

        let poses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM poses")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            jobs,
            poses: poses.max(0) as u64,
            jobs_by_status,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DatabaseStats {
    pub jobs: u64,
    pub poses: u64,
    pub jobs_by_status: HashMap<JobStatus, u64>,
}

impl DatabaseStats {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }
}
