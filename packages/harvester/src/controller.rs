//! The job controller.
//!
//! Owns every job's state machine. All job mutations go through here and
//! are persisted before they count as committed. Collaborators are injected
//! as trait objects; inbound events arrive on a channel and are dispatched
//! one task per event.
//!
//! Store writes are read-modify-persist under a lock per job. No lock is held
//! across collaborator calls or pacing delays, so a stalled job never holds
//! up another.

use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::error::{HarvestError, JobFailure, Result};
use crate::events::{ControllerEvent, Notification};
use crate::ingestion::BatchSubmitter;
use crate::locator::{is_origin_page, is_paginated_source};
use crate::machine::{PageDecision, PageMachine};
use crate::notify::TracingNotifier;
use crate::queries;
use crate::stores::MemoryJobStore;
use crate::traits::{
    extractor::PageExtractor, ingestion::IngestionEndpoint, notifier::ProgressNotifier,
    store::JobStore, surface::SurfaceDriver,
};
use crate::types::{
    job::{Job, JobId, JobStatus},
    page::{PageResult, SurfaceHandle},
};

const SUBMITTING_MESSAGE: &str = "submitting records";

/// Builder for [`Controller`].
///
/// The surface driver, page extractor and ingestion endpoint are required.
/// The store defaults to an in-memory table and the notifier to the log.
#[derive(Default)]
pub struct ControllerBuilder {
    store: Option<Arc<dyn JobStore>>,
    driver: Option<Arc<dyn SurfaceDriver>>,
    extractor: Option<Arc<dyn PageExtractor>>,
    endpoint: Option<Arc<dyn IngestionEndpoint>>,
    notifier: Option<Arc<dyn ProgressNotifier>>,
    config: HarvestConfig,
}

impl ControllerBuilder {
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_driver(mut self, driver: Arc<dyn SurfaceDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn IngestionEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ProgressNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_config(mut self, config: HarvestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Arc<Controller>> {
        let driver = self
            .driver
            .ok_or_else(|| HarvestError::Config("surface driver is required".into()))?;
        let extractor = self
            .extractor
            .ok_or_else(|| HarvestError::Config("page extractor is required".into()))?;
        let endpoint = self
            .endpoint
            .ok_or_else(|| HarvestError::Config("ingestion endpoint is required".into()))?;

        Ok(Arc::new(Controller {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryJobStore::new())),
            driver,
            extractor,
            submitter: BatchSubmitter::from_config(endpoint, &self.config),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
            machine: PageMachine::new(&self.config),
            config: self.config,
            job_locks: Arc::new(DashMap::new()),
            unclaimed: DashSet::new(),
            submissions: DashMap::new(),
        }))
    }
}

/// Drives extraction jobs from start to delivery.
pub struct Controller {
    store: Arc<dyn JobStore>,
    driver: Arc<dyn SurfaceDriver>,
    extractor: Arc<dyn PageExtractor>,
    submitter: BatchSubmitter,
    notifier: Arc<dyn ProgressNotifier>,
    machine: PageMachine,
    config: HarvestConfig,
    /// Serializes read-modify-persist per job.
    job_locks: Arc<DashMap<JobId, Arc<Mutex<()>>>>,
    /// Surfaces that reported a load before any job owned them.
    unclaimed: DashSet<SurfaceHandle>,
    /// Cancellation for jobs currently in the submission phase.
    submissions: DashMap<JobId, CancellationToken>,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::default()
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.store.get(job_id).await
    }

    /// The job an observer opening now should attach to.
    pub async fn most_recent_active(&self) -> Result<Option<Job>> {
        queries::find_most_recent_active(self.store.as_ref()).await
    }

    /// Read the persisted table after a restart.
    ///
    /// Jobs are only made visible again; a job left `running` against a
    /// surface that no longer exists stays as it is.
    pub async fn rehydrate(&self) -> Result<Vec<Job>> {
        let jobs = self.store.list().await?;

        let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
        for job in &jobs {
            *by_status.entry(job.status.as_str()).or_default() += 1;
        }
        for (status, count) in &by_status {
            info!(status, count, "Rehydrated jobs");
        }
        for job in jobs.iter().filter(|job| job.status.is_active()) {
            warn!(
                job_id = %job.id,
                status = %job.status,
                surface = ?job.surface,
                "Job was mid-flight at shutdown"
            );
        }

        Ok(jobs)
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Create a job for `source_url` and open its first review page.
    ///
    /// Fails only when the source is not an origin page. Any later failure
    /// ends up on the job itself, whose id is still returned.
    pub async fn start(self: &Arc<Self>, source_url: &str) -> Result<JobId> {
        if !is_origin_page(source_url) {
            return Err(HarvestError::InvalidSource {
                url: source_url.to_string(),
            });
        }

        let job = Job::new(source_url);
        let job_id = job.id;
        self.store.put(&job).await?;
        info!(job_id = %job_id, source_url, "Starting extraction");

        let locator = match self.extractor.resolve_first_locator(source_url).await {
            Ok(locator) => locator,
            Err(e) => {
                self.fail_job(job_id, JobFailure::LocatorUnresolvable(e.to_string()))
                    .await?;
                return Ok(job_id);
            }
        };

        let handle = match self.driver.open(&locator).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_job(job_id, JobFailure::Navigation(e.to_string()))
                    .await?;
                return Ok(job_id);
            }
        };

        if let Some(owner) = self.store.find_by_surface(handle).await? {
            error!(
                job_id = %job_id,
                owner = %owner.id,
                surface = %handle,
                "Driver handed out a surface that is already owned"
            );
            let failure =
                JobFailure::Navigation(format!("{} is already owned by job {}", handle, owner.id));
            self.fail_job(job_id, failure).await?;
            return Ok(job_id);
        }

        let attached = {
            let _guard = self.lock_job(job_id).await;
            match self.store.get(job_id).await? {
                Some(mut job) if job.status == JobStatus::Starting => {
                    job.surface = Some(handle);
                    job.last_locator = Some(locator);
                    job.transition(JobStatus::Running)?;
                    self.store.put(&job).await?;
                    Some(job)
                }
                _ => None,
            }
        };
        let Some(job) = attached else {
            // Cancelled while the surface was opening
            self.release(job_id, handle).await;
            return Ok(job_id);
        };

        info!(job_id = %job_id, surface = %handle, "Job running");
        self.notifier.notify(Notification::progress(&job, None));

        if self.unclaimed.remove(&handle).is_some() {
            self.check_loaded_surface(job, handle).await?;
        }
        Ok(job_id)
    }

    // =========================================================================
    // Page results
    // =========================================================================

    /// Apply one extractor result and carry out whatever it implies.
    pub async fn on_page_result(self: &Arc<Self>, result: PageResult) -> Result<()> {
        let job_id = result.job_id;

        let (outcome, surface) = {
            let _guard = self.lock_job(job_id).await;
            let Some(mut job) = self.store.get(job_id).await? else {
                debug!(job_id = %job_id, "Page result for unknown job, ignoring");
                return Ok(());
            };

            let outcome = self.machine.decide(&mut job, result);
            if !outcome.decision.is_mutation() {
                return Ok(());
            }

            let surface = match outcome.decision {
                PageDecision::ExtractionFailed | PageDecision::Fail(_) => job.take_surface(),
                _ => None,
            };
            self.store.put(&job).await?;
            (outcome, surface)
        };

        for notification in outcome.notifications {
            self.notifier.notify(notification);
        }

        match outcome.decision {
            PageDecision::Ignore | PageDecision::Challenge => {}
            PageDecision::ExtractionFailed => {
                if let Some(handle) = surface {
                    self.release(job_id, handle).await;
                }
                self.remove_job(job_id).await?;
            }
            PageDecision::Fail(failure) => {
                warn!(job_id = %job_id, error = %failure, "Job failed");
                if let Some(handle) = surface {
                    self.release(job_id, handle).await;
                }
                self.schedule_removal(job_id);
            }
            PageDecision::Continue { next } => self.schedule_navigation(job_id, next),
            PageDecision::Finalize => self.finalize(job_id).await?,
        }

        Ok(())
    }

    fn schedule_navigation(self: &Arc<Self>, job_id: JobId, locator: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.config.page_delay).await;
            if let Err(e) = this.navigate_if_running(job_id, &locator).await {
                error!(job_id = %job_id, error = %e, "Deferred navigation failed");
            }
        });
    }

    async fn navigate_if_running(self: &Arc<Self>, job_id: JobId, locator: &str) -> Result<()> {
        let handle = {
            let _guard = self.lock_job(job_id).await;
            let Some(job) = self.store.get(job_id).await? else {
                return Ok(());
            };
            let Some(handle) = job.surface else {
                return Ok(());
            };
            if job.status != JobStatus::Running || job.last_locator.as_deref() != Some(locator) {
                debug!(
                    job_id = %job_id,
                    status = %job.status,
                    "Job moved on during pacing delay, not navigating"
                );
                return Ok(());
            }
            handle
        };

        debug!(job_id = %job_id, surface = %handle, locator, "Navigating to next page");
        if let Err(e) = self.driver.navigate(handle, locator).await {
            // A no-op if the job was cancelled while the call was in flight
            self.fail_job(job_id, JobFailure::Navigation(e.to_string()))
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Surface events
    // =========================================================================

    /// A surface finished loading. Scrape it after the settle delay if it is
    /// still on the review pages of a running job.
    pub async fn on_surface_navigation_complete(
        self: &Arc<Self>,
        handle: SurfaceHandle,
    ) -> Result<()> {
        let job = match self.store.find_by_surface(handle).await? {
            Some(job) => job,
            None => {
                // The opening job may not have attached the surface yet.
                // Whichever side takes the entry back out handles the load.
                self.unclaimed.insert(handle);
                match self.store.find_by_surface(handle).await? {
                    Some(job) if self.unclaimed.remove(&handle).is_some() => job,
                    _ => {
                        debug!(surface = %handle, "Navigation complete on an unowned surface");
                        return Ok(());
                    }
                }
            }
        };
        self.check_loaded_surface(job, handle).await
    }

    async fn check_loaded_surface(self: &Arc<Self>, job: Job, handle: SurfaceHandle) -> Result<()> {
        if job.status != JobStatus::Running {
            debug!(job_id = %job.id, status = %job.status, "Navigation complete for inactive job");
            return Ok(());
        }

        let location = match self.driver.current_location(handle).await {
            Ok(Some(location)) => location,
            Ok(None) => {
                debug!(job_id = %job.id, surface = %handle, "Surface gone before it was checked");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    surface = %handle,
                    error = %e,
                    "Could not read surface location"
                );
                return Ok(());
            }
        };

        if !is_paginated_source(&location) {
            return self
                .fail_job(job.id, JobFailure::NavigationIntegrity { location })
                .await;
        }

        let this = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            tokio::time::sleep(this.config.settle_delay).await;
            if let Err(e) = this.scrape_if_running(job_id, handle).await {
                error!(job_id = %job_id, error = %e, "Scrape request failed");
            }
        });
        Ok(())
    }

    async fn scrape_if_running(
        self: &Arc<Self>,
        job_id: JobId,
        handle: SurfaceHandle,
    ) -> Result<()> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(());
        };
        if job.status != JobStatus::Running || !job.owns(handle) {
            return Ok(());
        }

        debug!(job_id = %job_id, surface = %handle, "Requesting scrape");
        if let Err(e) = self.extractor.request_scrape(job_id, handle).await {
            self.fail_job(job_id, JobFailure::Extraction(e.to_string()))
                .await?;
        }
        Ok(())
    }

    /// A surface was closed by someone other than the controller.
    pub async fn on_surface_closed_externally(&self, handle: SurfaceHandle) -> Result<()> {
        let Some(owner) = self.store.find_by_surface(handle).await? else {
            debug!(surface = %handle, "Closed surface has no owner");
            return Ok(());
        };
        self.unclaimed.remove(&handle);

        let (job_id, lost_running_job) = {
            let _guard = self.lock_job(owner.id).await;
            let Some(mut job) = self
                .store
                .get(owner.id)
                .await?
                .filter(|job| job.owns(handle))
            else {
                return Ok(());
            };

            // Already closed; forget it rather than close it again
            job.take_surface();

            match job.status {
                JobStatus::Running => {
                    job.cancel();
                    self.store.put(&job).await?;
                    (job.id, true)
                }
                JobStatus::Sending => {
                    // Submission does not need the surface
                    self.store.put(&job).await?;
                    return Ok(());
                }
                _ => {
                    self.store.put(&job).await?;
                    (job.id, false)
                }
            }
        };

        if lost_running_job {
            warn!(job_id = %job_id, surface = %handle, "Surface closed externally");
            self.notifier
                .notify(Notification::error(job_id, &JobFailure::SurfaceLostExternally));
        }
        self.remove_job(job_id).await
    }

    // =========================================================================
    // Finalize
    // =========================================================================

    /// Submit a job's records and move it to `done`.
    pub async fn finalize(self: &Arc<Self>, job_id: JobId) -> Result<()> {
        let (records, token) = {
            let _guard = self.lock_job(job_id).await;
            let Some(mut job) = self.store.get(job_id).await? else {
                return Ok(());
            };
            if job.transition(JobStatus::Sending).is_err() {
                debug!(job_id = %job_id, status = %job.status, "Job cannot be finalized");
                return Ok(());
            }
            self.store.put(&job).await?;
            self.notifier
                .notify(Notification::progress(&job, Some(SUBMITTING_MESSAGE)));

            let token = CancellationToken::new();
            self.submissions.insert(job_id, token.clone());
            (job.records, token)
        };

        info!(job_id = %job_id, records = records.len(), "Submitting records");
        let submitted = self.submitter.submit(&records, &token).await;
        self.submissions.remove(&job_id);

        match submitted {
            Ok(report) => {
                let surface = {
                    let _guard = self.lock_job(job_id).await;
                    let Some(mut job) = self.store.get(job_id).await? else {
                        return Ok(());
                    };
                    if job.transition(JobStatus::Done).is_err() {
                        return Ok(());
                    }
                    let surface = job.take_surface();
                    self.store.put(&job).await?;
                    surface
                };

                info!(
                    job_id = %job_id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Job done"
                );
                self.notifier.notify(Notification::Done {
                    job_id,
                    total: records.len(),
                });
                if let Some(handle) = surface {
                    self.release(job_id, handle).await;
                }
                self.schedule_removal(job_id);
                Ok(())
            }
            Err(HarvestError::Cancelled) => {
                debug!(job_id = %job_id, "Submission stopped by cancellation");
                Ok(())
            }
            Err(e) => {
                // Collected records are dropped with the job; nothing is retried.
                self.fail_job(job_id, JobFailure::DeliveryFailure(e.to_string()))
                    .await
            }
        }
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Stop a job at the user's request and remove it.
    ///
    /// Unknown jobs are a no-op. A job already failed on a challenge only
    /// has its surface released.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let (surface, was_active) = {
            let _guard = self.lock_job(job_id).await;
            let Some(mut job) = self.store.get(job_id).await? else {
                debug!(job_id = %job_id, "Cancel for unknown job");
                return Ok(());
            };

            if job.cancel() {
                let surface = job.take_surface();
                self.store.put(&job).await?;
                (surface, true)
            } else if job.surface.is_some() {
                (job.take_surface(), false)
            } else {
                return Ok(());
            }
        };

        if let Some(token) = self.submissions.get(&job_id) {
            token.cancel();
        }
        if let Some(handle) = surface {
            self.release(job_id, handle).await;
        }
        if was_active {
            info!(job_id = %job_id, "Job cancelled");
            self.notifier
                .notify(Notification::error(job_id, &JobFailure::UserCancelled));
        }
        self.remove_job(job_id).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Move a job to `error`, release its surface and schedule removal.
    /// Does nothing if the job is gone or already terminal.
    async fn fail_job(&self, job_id: JobId, failure: JobFailure) -> Result<()> {
        let surface = {
            let _guard = self.lock_job(job_id).await;
            let Some(mut job) = self.store.get(job_id).await? else {
                return Ok(());
            };
            if !job.fail(&failure) {
                return Ok(());
            }
            let surface = job.take_surface();
            self.store.put(&job).await?;
            surface
        };

        warn!(job_id = %job_id, error = %failure, "Job failed");
        self.notifier.notify(Notification::error(job_id, &failure));
        if let Some(handle) = surface {
            self.release(job_id, handle).await;
        }
        self.schedule_removal(job_id);
        Ok(())
    }

    /// Take the lock that serializes store writes for one job.
    async fn lock_job(&self, job_id: JobId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.job_locks.entry(job_id).or_default().value());
        lock.lock_owned().await
    }

    async fn remove_job(&self, job_id: JobId) -> Result<()> {
        self.store.delete(job_id).await?;
        self.job_locks.remove(&job_id);
        Ok(())
    }

    /// Close a surface the job has already let go of.
    async fn release(&self, job_id: JobId, handle: SurfaceHandle) {
        self.unclaimed.remove(&handle);
        debug!(job_id = %job_id, surface = %handle, "Releasing surface");
        if let Err(e) = self.driver.close(handle).await {
            warn!(job_id = %job_id, surface = %handle, error = %e, "Failed to close surface");
        }
    }

    /// Drop a terminal job once observers have had time to see it.
    fn schedule_removal(&self, job_id: JobId) {
        let store = Arc::clone(&self.store);
        let job_locks = Arc::clone(&self.job_locks);
        let grace = self.config.removal_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match store.get(job_id).await {
                Ok(Some(job)) if job.status.is_terminal() => {
                    if let Err(e) = store.delete(job_id).await {
                        warn!(job_id = %job_id, error = %e, "Failed to remove finished job");
                    }
                    job_locks.remove(&job_id);
                }
                Ok(_) => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to load finished job"),
            }
        });
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Consume events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        info!("Controller event loop started");
        while let Some(event) = events.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.dispatch(event).await });
        }
        info!("Controller event loop stopped");
    }

    /// Spawn [`Controller::run`] on the current runtime.
    pub fn spawn(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(events))
    }

    async fn dispatch(self: Arc<Self>, event: ControllerEvent) {
        match event {
            ControllerEvent::Start { source_url, reply } => {
                let _ = reply.send(self.start(&source_url).await);
            }
            ControllerEvent::Cancel { job_id, reply } => {
                let _ = reply.send(self.cancel(job_id).await);
            }
            ControllerEvent::PageResult(result) => {
                let job_id = result.job_id;
                if let Err(e) = self.on_page_result(result).await {
                    error!(job_id = %job_id, error = %e, "Failed to handle page result");
                }
            }
            ControllerEvent::NavigationComplete(handle) => {
                if let Err(e) = self.on_surface_navigation_complete(handle).await {
                    error!(surface = %handle, error = %e, "Failed to handle navigation complete");
                }
            }
            ControllerEvent::SurfaceClosed(handle) => {
                if let Err(e) = self.on_surface_closed_externally(handle).await {
                    error!(surface = %handle, error = %e, "Failed to handle surface close");
                }
            }
        }
    }
}

/// Cloneable sender side of the controller's event loop.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    pub fn new(events: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { events }
    }

    pub async fn start(&self, source_url: impl Into<String>) -> Result<JobId> {
        let (reply, response) = oneshot::channel();
        self.send(ControllerEvent::Start {
            source_url: source_url.into(),
            reply,
        })?;
        response.await.map_err(|_| HarvestError::Cancelled)?
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(ControllerEvent::Cancel { job_id, reply })?;
        response.await.map_err(|_| HarvestError::Cancelled)?
    }

    pub fn page_result(&self, result: PageResult) -> Result<()> {
        self.send(ControllerEvent::PageResult(result))
    }

    pub fn navigation_complete(&self, handle: SurfaceHandle) -> Result<()> {
        self.send(ControllerEvent::NavigationComplete(handle))
    }

    pub fn surface_closed(&self, handle: SurfaceHandle) -> Result<()> {
        self.send(ControllerEvent::SurfaceClosed(handle))
    }

    fn send(&self, event: ControllerEvent) -> Result<()> {
        self.events.send(event).map_err(|_| HarvestError::Cancelled)
    }
}
