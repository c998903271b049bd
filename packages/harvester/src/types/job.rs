//! The job entity: one end-to-end extraction run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{HarvestError, JobFailure, Result};
use crate::types::page::SurfaceHandle;
use crate::types::record::Record;

/// Opaque job identifier, generated at creation and never reused.
///
/// UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Sending,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Sending => "sending",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }

    /// Running or sending: what the observer treats as "in progress".
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Sending)
    }

    /// Edges of the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Error)
                | (Starting, Cancelled)
                | (Running, Sending)
                | (Running, Error)
                | (Running, Cancelled)
                | (Sending, Done)
                | (Sending, Error)
                | (Sending, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full persisted state of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub source_url: String,

    /// Surface owned by this job; `None` once released.
    pub surface: Option<SurfaceHandle>,

    /// First-writer-wins
    pub total_count: Option<u64>,
    /// First-writer-wins
    pub total_pages: Option<u32>,
    pub current_page: Option<u32>,

    /// Append-only
    pub records: Vec<Record>,
    pub seen_ids: BTreeSet<String>,

    pub last_locator: Option<String>,
    pub stuck_count: u32,

    /// Set only when `status == Error`
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Starting,
            source_url: source_url.into(),
            surface: None,
            total_count: None,
            total_pages: None,
            current_page: None,
            records: Vec::new(),
            seen_ids: BTreeSet::new(),
            last_locator: None,
            stuck_count: 0,
            error: None,
            started_at: Utc::now(),
            cancelled_at: None,
        }
    }

    pub fn collected_count(&self) -> usize {
        self.records.len()
    }

    pub fn owns(&self, handle: SurfaceHandle) -> bool {
        self.surface == Some(handle)
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the job failed with a human-readable message.
    ///
    /// Returns `false` (and leaves the job untouched) if the job is already
    /// terminal.
    pub fn fail(&mut self, failure: &JobFailure) -> bool {
        if self.transition(JobStatus::Error).is_err() {
            return false;
        }
        self.error = Some(failure.to_string());
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.transition(JobStatus::Cancelled).is_err() {
            return false;
        }
        self.cancelled_at = Some(Utc::now());
        true
    }

    /// Hand back the surface handle so it can be closed. Yields `Some` at
    /// most once per job.
    pub fn take_surface(&mut self) -> Option<SurfaceHandle> {
        self.surface.take()
    }
}
