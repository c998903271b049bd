//! Read-only views over the job table for observers and operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::store::JobStore;
use crate::types::job::{Job, JobId, JobStatus};

/// A job without its record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub source_url: String,
    pub collected_count: usize,
    pub total_count: Option<u64>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub error: Option<String>,
    pub holds_surface: bool,
    pub started_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            source_url: job.source_url.clone(),
            collected_count: job.collected_count(),
            total_count: job.total_count,
            current_page: job.current_page,
            total_pages: job.total_pages,
            error: job.error.clone(),
            holds_surface: job.surface.is_some(),
            started_at: job.started_at,
            cancelled_at: job.cancelled_at,
        }
    }
}

/// The most recently started job that is running or sending.
///
/// Ties on start time go to the job listed last.
pub fn most_recent_active(jobs: &[Job]) -> Option<&Job> {
    jobs.iter()
        .filter(|job| job.status.is_active())
        .max_by_key(|job| job.started_at)
}

pub async fn find_most_recent_active(store: &dyn JobStore) -> Result<Option<Job>> {
    let jobs = store.list().await?;
    Ok(most_recent_active(&jobs).cloned())
}

pub async fn summaries(store: &dyn JobStore) -> Result<Vec<JobSummary>> {
    Ok(store.list().await?.iter().map(JobSummary::from).collect())
}

/// Delete every terminal job that no longer holds a surface.
///
/// Jobs parked on a challenge keep their surface and are left alone.
pub async fn purge_terminal(store: &dyn JobStore) -> Result<Vec<JobId>> {
    let mut purged = Vec::new();
    for job in store.list().await? {
        if job.status.is_terminal() && job.surface.is_none() {
            store.delete(job.id).await?;
            purged.push(job.id);
        }
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryJobStore;
    use crate::types::page::SurfaceHandle;
    use chrono::Duration;

    fn job(status: JobStatus, minutes_ago: i64) -> Job {
        let mut job = Job::new("https://www.amazon.com/dp/B0ABCDEF12");
        job.status = status;
        job.started_at = Utc::now() - Duration::minutes(minutes_ago);
        job
    }

    #[test]
    fn test_picks_latest_running_or_sending() {
        let jobs = vec![
            job(JobStatus::Running, 30),
            job(JobStatus::Sending, 10),
            job(JobStatus::Done, 1),
            job(JobStatus::Starting, 0),
        ];
        assert_eq!(most_recent_active(&jobs).map(|j| j.id), Some(jobs[1].id));
    }

    #[test]
    fn test_no_active_job() {
        let jobs = vec![job(JobStatus::Error, 5), job(JobStatus::Cancelled, 1)];
        assert!(most_recent_active(&jobs).is_none());
        assert!(most_recent_active(&[]).is_none());
    }

    #[tokio::test]
    async fn test_purge_keeps_active_and_challenged_jobs() {
        let store = MemoryJobStore::new();
        let running = job(JobStatus::Running, 3);
        let done = job(JobStatus::Done, 2);
        let mut challenged = job(JobStatus::Error, 1);
        challenged.surface = Some(SurfaceHandle::new(9));

        for j in [&running, &done, &challenged] {
            store.put(j).await.unwrap();
        }

        let purged = purge_terminal(&store).await.unwrap();
        assert_eq!(purged, vec![done.id]);

        let left: Vec<_> = summaries(&store).await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(left, vec![running.id, challenged.id]);
    }

    #[test]
    fn test_summary_counts_records() {
        let mut j = job(JobStatus::Running, 0);
        j.records.push(crate::types::record::Record::new(None, "a"));
        j.records.push(crate::types::record::Record::new(None, "b"));
        let summary = JobSummary::from(&j);
        assert_eq!(summary.collected_count, 2);
        assert!(!summary.holds_surface);
    }
}
