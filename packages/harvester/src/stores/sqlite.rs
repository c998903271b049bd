//! SQLite job store.
//!
//! A file-based storage backend using SQLite. Each job is one row holding
//! the full job record as JSON, so a restarted process sees exactly what was
//! last committed.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HarvestError, Result};
use crate::traits::store::JobStore;
use crate::types::job::{Job, JobId};

/// SQLite-based job store.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://harvester.db?mode=rwc` - File-based, created if missing
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(HarvestError::store)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(HarvestError::store)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Pinned to a single connection that never expires: every SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(HarvestError::store)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(HarvestError::store)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extraction_jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                body TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(HarvestError::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_extraction_jobs_status ON extraction_jobs(status);",
        )
            .execute(&self.pool)
            .await
            .map_err(HarvestError::store)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing everything to disk.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode(body: &str) -> Result<Job> {
    serde_json::from_str(body)
        .map_err(|e| HarvestError::store(format!("Invalid job JSON: {}", e)))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM extraction_jobs WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(HarvestError::store)?;

        body.as_deref().map(decode).transpose()
    }

    async fn put(&self, job: &Job) -> Result<()> {
        let body = serde_json::to_string(job)?;

        sqlx::query(
            r#"
            INSERT INTO extraction_jobs (id, status, started_at, body)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.as_str())
        .bind(job.started_at.to_rfc3339())
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(HarvestError::store)?;

        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM extraction_jobs WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(HarvestError::store)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let bodies: Vec<String> =
            sqlx::query_scalar("SELECT body FROM extraction_jobs ORDER BY started_at, id")
                .fetch_all(&self.pool)
                .await
                .map_err(HarvestError::store)?;

        bodies.iter().map(|body| decode(body)).collect()
    }
}
