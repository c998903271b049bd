use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{JobFailure, Result};
use crate::types::{
    job::{Job, JobId, JobStatus},
    page::{PageResult, SurfaceHandle},
};

/// Everything that can arrive at the controller.
///
/// Requests that need an answer carry a oneshot reply channel.
#[derive(Debug)]
pub enum ControllerEvent {
    /// Begin extracting from an origin page.
    Start {
        source_url: String,
        reply: oneshot::Sender<Result<JobId>>,
    },

    /// User asked to stop a job. Replies once the job is gone.
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Extractor finished with a page.
    PageResult(PageResult),

    /// Tab driver finished loading a location on a surface.
    NavigationComplete(SurfaceHandle),

    /// Surface went away without the controller closing it.
    SurfaceClosed(SurfaceHandle),
}

/// Fire-and-forget updates for the observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Progress {
        job_id: JobId,
        status: JobStatus,
        /// Optional human-readable phase, e.g. "submitting records".
        message: Option<String>,
        current: usize,
        total: Option<u64>,
        current_page: Option<u32>,
        total_pages: Option<u32>,
    },

    Done {
        job_id: JobId,
        total: usize,
    },

    Error {
        job_id: JobId,
        error: String,
    },
}

impl Notification {
    /// Snapshot of a job's counters.
    pub fn progress(job: &Job, message: Option<&str>) -> Self {
        Notification::Progress {
            job_id: job.id,
            status: job.status,
            message: message.map(String::from),
            current: job.collected_count(),
            total: job.total_count,
            current_page: job.current_page,
            total_pages: job.total_pages,
        }
    }

    pub fn error(job_id: JobId, failure: &JobFailure) -> Self {
        Notification::Error {
            job_id,
            error: failure.to_string(),
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Notification::Progress { job_id, .. }
            | Notification::Done { job_id, .. }
            | Notification::Error { job_id, .. } => *job_id,
        }
    }

    /// `Done` or `Error`: nothing more will be said about this job.
    pub fn is_final(&self) -> bool {
        !matches!(self, Notification::Progress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifications_are_type_tagged() {
        let job_id = JobId::new();
        let json = serde_json::to_value(Notification::Done { job_id, total: 30 }).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["total"], 30);

        let json = serde_json::to_value(Notification::Error {
            job_id,
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
    }

    #[test]
    fn test_progress_snapshots_job_counters() {
        let mut job = Job::new("src");
        job.total_count = Some(120);
        job.current_page = Some(2);
        job.records.push(crate::types::record::Record::new(None, "x"));

        match Notification::progress(&job, Some("submitting records")) {
            Notification::Progress {
                current,
                total,
                current_page,
                message,
                ..
            } => {
                assert_eq!(current, 1);
                assert_eq!(total, Some(120));
                assert_eq!(current_page, Some(2));
                assert_eq!(message.as_deref(), Some("submitting records"));
            }
            other => panic!("expected progress, got {:?}", other),
        }
    }

    #[test]
    fn test_final_notifications() {
        let job_id = JobId::new();
        assert!(Notification::Done { job_id, total: 0 }.is_final());
        assert!(!Notification::Progress {
            job_id,
            status: JobStatus::Running,
            message: None,
            current: 0,
            total: None,
            current_page: None,
            total_pages: None,
        }
        .is_final());
    }
}
