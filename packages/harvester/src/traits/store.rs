//! Storage trait for the job table.
//!
//! A single table keyed by job id holding the full job record. Every
//! state-affecting controller operation writes through here before it is
//! considered committed, and the table is read back in full on start-up.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    job::{Job, JobId},
    page::SurfaceHandle,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Get a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Insert or replace a job.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Remove a job. Removing an unknown id is not an error.
    async fn delete(&self, id: JobId) -> Result<()>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<Job>>;

    /// The job currently owning `handle`, if any.
    async fn find_by_surface(&self, handle: SurfaceHandle) -> Result<Option<Job>> {
        Ok(self.list().await?.into_iter().find(|job| job.owns(handle)))
    }
}
