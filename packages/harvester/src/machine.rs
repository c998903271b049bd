//! Page-result transition logic.
//!
//! Pure and synchronous: applies one extractor result to a job and decides
//! what the controller must do next. All IO (persisting, closing surfaces,
//! scheduling navigation, notifying) belongs to the controller.

use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::dedup::DedupIndex;
use crate::error::JobFailure;
use crate::events::Notification;
use crate::locator::same_page;
use crate::stuck::StuckDetector;
use crate::types::job::{Job, JobStatus};
use crate::types::page::PageResult;

/// What the controller has to carry out after a page result.
#[derive(Debug, Clone, PartialEq)]
pub enum PageDecision {
    /// Unknown or no longer running job; nothing changed.
    Ignore,

    /// Verification challenge. The job is in error but keeps its surface
    /// so a human can resolve it.
    Challenge,

    /// Extractor failure. Release the surface and drop the job at once.
    ExtractionFailed,

    /// Any other failure. Release the surface; the job lingers in `error`
    /// for the removal grace period.
    Fail(JobFailure),

    /// Navigate to `next` after the pacing delay.
    Continue { next: String },

    /// Last page reached; submit the records.
    Finalize,
}

impl PageDecision {
    /// Whether the job was changed and must be persisted.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, PageDecision::Ignore)
    }
}

/// A decision plus the observer notifications it implies, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub decision: PageDecision,
    pub notifications: Vec<Notification>,
}

impl PageOutcome {
    fn ignore() -> Self {
        Self {
            decision: PageDecision::Ignore,
            notifications: Vec::new(),
        }
    }
}

/// Decides page-result transitions for running jobs.
#[derive(Debug, Clone, Copy)]
pub struct PageMachine {
    detector: StuckDetector,
    max_pages: u32,
}

impl PageMachine {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            detector: StuckDetector::new(config.stuck_threshold),
            max_pages: config.max_pages,
        }
    }

    /// Apply `result` to `job` and decide what happens next.
    pub fn decide(&self, job: &mut Job, result: PageResult) -> PageOutcome {
        if job.status != JobStatus::Running {
            debug!(
                job_id = %job.id,
                status = %job.status,
                "Page result for inactive job, ignoring"
            );
            return PageOutcome::ignore();
        }

        if result.challenge_detected {
            warn!(job_id = %job.id, "Verification challenge detected");
            return self.fail(
                job,
                JobFailure::ChallengeDetected,
                PageDecision::Challenge,
                Vec::new(),
            );
        }

        if let Some(message) = result.error {
            warn!(job_id = %job.id, error = %message, "Extractor reported a failure");
            return self.fail(
                job,
                JobFailure::Extraction(message),
                PageDecision::ExtractionFailed,
                Vec::new(),
            );
        }

        let stats = DedupIndex::new(&mut job.seen_ids, &mut job.records).merge(result.records);
        debug!(
            job_id = %job.id,
            incoming = stats.incoming,
            appended = stats.appended,
            dropped = stats.dropped(),
            "Merged page records"
        );
        if stats.is_duplicate_only() {
            let verdict = self.detector.record_stall(&mut job.stuck_count);
            info!(
                job_id = %job.id,
                stuck_count = job.stuck_count,
                "Page contained only duplicates"
            );
            if verdict.is_tripped() {
                return self.fail_released(job, JobFailure::PaginationStuck, Vec::new());
            }
        }

        if job.total_count.is_none() {
            job.total_count = result.total_count;
        }

        if let Some(page) = result.current_page {
            let verdict = self
                .detector
                .observe_page(&mut job.stuck_count, job.current_page, page);
            job.current_page = Some(page);
            if verdict.is_tripped() {
                return self.fail_released(job, JobFailure::PaginationStuck, Vec::new());
            }
        }

        if job.total_pages.is_none() {
            job.total_pages = result.total_pages;
        }

        let progress = vec![Notification::progress(job, None)];

        let Some(next) = result.next_locator else {
            return PageOutcome {
                decision: PageDecision::Finalize,
                notifications: progress,
            };
        };

        let page = job.current_page.unwrap_or(0);
        if page > self.max_pages {
            warn!(job_id = %job.id, page, limit = self.max_pages, "Page cap exceeded");
            return self.fail_released(
                job,
                JobFailure::SafetyLimitExceeded {
                    limit: self.max_pages,
                },
                progress,
            );
        }

        if let Some(last) = &job.last_locator {
            if same_page(&next, last) {
                warn!(
                    job_id = %job.id,
                    locator = %next,
                    "Next page is the page just visited"
                );
                return self.fail_released(job, JobFailure::PaginationStuck, progress);
            }
        }

        job.last_locator = Some(next.clone());
        PageOutcome {
            decision: PageDecision::Continue { next },
            notifications: progress,
        }
    }

    fn fail_released(
        &self,
        job: &mut Job,
        failure: JobFailure,
        notifications: Vec<Notification>,
    ) -> PageOutcome {
        let decision = PageDecision::Fail(failure.clone());
        self.fail(job, failure, decision, notifications)
    }

    fn fail(
        &self,
        job: &mut Job,
        failure: JobFailure,
        decision: PageDecision,
        mut notifications: Vec<Notification>,
    ) -> PageOutcome {
        job.fail(&failure);
        notifications.push(Notification::error(job.id, &failure));
        PageOutcome {
            decision,
            notifications,
        }
    }
}

impl Default for PageMachine {
    fn default() -> Self {
        Self::new(&HarvestConfig::default())
    }
}
