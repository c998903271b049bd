//! In-memory job store for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::traits::store::JobStore;
use crate::types::job::{Job, JobId};

/// In-memory job table.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart. Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl MemoryJobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Clear all stored jobs.
    pub async fn clear(&self) {
        self.jobs.write().await.clear();
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn put(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        self.jobs.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.started_at);
        Ok(jobs)
    }
}
