use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::job::JobId;
use crate::types::record::Record;

/// Reference to a Tab Driver surface. A surface is owned by at most one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(u64);

impl SurfaceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// What the page extractor reports for one loaded page.
///
/// This is the only data-bearing event flowing from the extractor into the
/// controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub job_id: JobId,

    #[serde(default)]
    pub records: Vec<Record>,

    pub total_count: Option<u64>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,

    /// Locator of the next page; `None` on the last page.
    pub next_locator: Option<String>,

    #[serde(default)]
    pub challenge_detected: bool,

    /// Extractor-side failure message.
    pub error: Option<String>,
}

impl PageResult {
    /// A normal page for `job_id`.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            ..Default::default()
        }
    }

    /// The extractor saw a verification challenge instead of content.
    pub fn challenge(job_id: JobId) -> Self {
        Self {
            job_id,
            challenge_detected: true,
            ..Default::default()
        }
    }

    /// The extractor failed internally.
    pub fn failed(job_id: JobId, message: impl Into<String>) -> Self {
        Self {
            job_id,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    pub fn with_page(mut self, current_page: u32) -> Self {
        self.current_page = Some(current_page);
        self
    }

    pub fn with_totals(mut self, total_count: u64, total_pages: u32) -> Self {
        self.total_count = Some(total_count);
        self.total_pages = Some(total_pages);
        self
    }

    pub fn with_next(mut self, locator: impl Into<String>) -> Self {
        self.next_locator = Some(locator.into());
        self
    }
}
