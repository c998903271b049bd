//! Testing utilities including mock implementations.
//!
//! These stand in for the browser, the page extractor and the ingestion
//! service so the controller can be exercised without any of them. Mocks
//! record every call for assertions and, when given an event sender, report
//! back to the controller the way the real collaborators would.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::error::{HarvestError, Result};
use crate::events::{ControllerEvent, Notification};
use crate::traits::{
    extractor::PageExtractor,
    ingestion::{DeliveryReceipt, IngestionEndpoint},
    notifier::ProgressNotifier,
    surface::SurfaceDriver,
};
use crate::types::{
    job::JobId,
    page::{PageResult, SurfaceHandle},
    record::Record,
};

// =============================================================================
// Surface driver
// =============================================================================

/// Record of a call made to the mock surface driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Open { handle: SurfaceHandle, locator: String },
    Navigate { handle: SurfaceHandle, locator: String },
    Close { handle: SurfaceHandle },
}

/// A fake browser: surfaces are entries in a map from handle to location.
///
/// Every successful open or navigate immediately reports
/// `NavigationComplete` if an event sender is attached.
#[derive(Default)]
pub struct MockSurfaceDriver {
    next_handle: AtomicU64,
    locations: Arc<RwLock<HashMap<SurfaceHandle, String>>>,
    calls: Arc<RwLock<Vec<SurfaceCall>>>,
    redirect: Arc<RwLock<Option<String>>>,
    fail_open: Option<String>,
    fail_navigate: Option<String>,
    stall_open_after: Option<u64>,
    fixed_handle: Option<SurfaceHandle>,
    events: Option<UnboundedSender<ControllerEvent>>,
}

impl MockSurfaceDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report load completion and external closes on `events`.
    pub fn with_events(mut self, events: UnboundedSender<ControllerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Make every `open` fail.
    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.fail_open = Some(message.into());
        self
    }

    /// Make every `navigate` fail.
    pub fn failing_navigate(mut self, message: impl Into<String>) -> Self {
        self.fail_navigate = Some(message.into());
        self
    }

    /// Opens after the first `count` never complete.
    pub fn stalling_open_after(mut self, count: u64) -> Self {
        self.stall_open_after = Some(count);
        self
    }

    /// Hand out `handle` for every open, as a confused browser would.
    pub fn reusing_handle(mut self, handle: SurfaceHandle) -> Self {
        self.fixed_handle = Some(handle);
        self
    }

    /// The next navigation lands on `location` instead of where it was sent.
    pub fn redirect_next_navigation(&self, location: impl Into<String>) {
        *self.redirect.write().unwrap() = Some(location.into());
    }

    /// Simulate the user closing a surface.
    pub fn close_externally(&self, handle: SurfaceHandle) {
        self.locations.write().unwrap().remove(&handle);
        self.emit(ControllerEvent::SurfaceClosed(handle));
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.read().unwrap().clone()
    }

    /// Locators surfaces were opened at, in order.
    pub fn opened(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Open { locator, .. } => Some(locator),
                _ => None,
            })
            .collect()
    }

    /// Locators surfaces were navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Navigate { locator, .. } => Some(locator),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self, handle: SurfaceHandle) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SurfaceCall::Close { handle: h } if *h == handle))
            .count()
    }

    pub fn is_open(&self, handle: SurfaceHandle) -> bool {
        self.locations.read().unwrap().contains_key(&handle)
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.write().unwrap().push(call);
    }

    fn emit(&self, event: ControllerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl SurfaceDriver for MockSurfaceDriver {
    async fn open(&self, locator: &str) -> Result<SurfaceHandle> {
        if let Some(message) = &self.fail_open {
            return Err(HarvestError::Surface(message.clone()));
        }

        let opened = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stall_open_after.is_some_and(|count| opened > count) {
            std::future::pending::<()>().await;
        }

        let handle = self
            .fixed_handle
            .unwrap_or_else(|| SurfaceHandle::new(opened));
        self.locations
            .write()
            .unwrap()
            .insert(handle, locator.to_string());
        self.record(SurfaceCall::Open {
            handle,
            locator: locator.to_string(),
        });
        self.emit(ControllerEvent::NavigationComplete(handle));
        Ok(handle)
    }

    async fn navigate(&self, handle: SurfaceHandle, locator: &str) -> Result<()> {
        self.record(SurfaceCall::Navigate {
            handle,
            locator: locator.to_string(),
        });
        if let Some(message) = &self.fail_navigate {
            return Err(HarvestError::Surface(message.clone()));
        }

        let landed = self
            .redirect
            .write()
            .unwrap()
            .take()
            .unwrap_or_else(|| locator.to_string());
        {
            let mut locations = self.locations.write().unwrap();
            let Some(location) = locations.get_mut(&handle) else {
                return Err(HarvestError::Surface(format!("{} does not exist", handle)));
            };
            *location = landed;
        }
        self.emit(ControllerEvent::NavigationComplete(handle));
        Ok(())
    }

    async fn close(&self, handle: SurfaceHandle) -> Result<()> {
        self.record(SurfaceCall::Close { handle });
        self.locations.write().unwrap().remove(&handle);
        Ok(())
    }

    async fn current_location(&self, handle: SurfaceHandle) -> Result<Option<String>> {
        Ok(self.locations.read().unwrap().get(&handle).cloned())
    }
}

// =============================================================================
// Page extractor
// =============================================================================

/// A scripted extractor.
///
/// Each scrape request pops the next scripted page, stamps it with the
/// requesting job's id and sends it back as a `PageResult` event. Once the
/// script runs out, scrape requests are accepted and answered with nothing.
pub struct MockPageExtractor {
    first_locator: std::result::Result<String, String>,
    pages: Arc<RwLock<VecDeque<PageResult>>>,
    scrapes: Arc<RwLock<Vec<(JobId, SurfaceHandle)>>>,
    fail_scrape: Option<String>,
    events: Option<UnboundedSender<ControllerEvent>>,
}

impl MockPageExtractor {
    /// Extractor that finds `first_locator` on every origin page.
    pub fn new(first_locator: impl Into<String>) -> Self {
        Self {
            first_locator: Ok(first_locator.into()),
            pages: Arc::default(),
            scrapes: Arc::default(),
            fail_scrape: None,
            events: None,
        }
    }

    /// Extractor that cannot find a review page link.
    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self {
            first_locator: Err(reason.into()),
            ..Self::new("")
        }
    }

    /// Send scripted pages back on `events`.
    pub fn with_events(mut self, events: UnboundedSender<ControllerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue a page. Its `job_id` is overwritten on delivery.
    pub fn with_page(self, page: PageResult) -> Self {
        self.pages.write().unwrap().push_back(page);
        self
    }

    pub fn with_pages(self, pages: impl IntoIterator<Item = PageResult>) -> Self {
        self.pages.write().unwrap().extend(pages);
        self
    }

    /// Make every scrape request fail.
    pub fn failing_scrape(mut self, message: impl Into<String>) -> Self {
        self.fail_scrape = Some(message.into());
        self
    }

    pub fn scrape_requests(&self) -> Vec<(JobId, SurfaceHandle)> {
        self.scrapes.read().unwrap().clone()
    }

    pub fn remaining_pages(&self) -> usize {
        self.pages.read().unwrap().len()
    }
}

#[async_trait]
impl PageExtractor for MockPageExtractor {
    async fn resolve_first_locator(&self, _source_url: &str) -> Result<String> {
        self.first_locator.clone().map_err(HarvestError::Extractor)
    }

    async fn request_scrape(&self, job_id: JobId, surface: SurfaceHandle) -> Result<()> {
        self.scrapes.write().unwrap().push((job_id, surface));
        if let Some(message) = &self.fail_scrape {
            return Err(HarvestError::Extractor(message.clone()));
        }

        let page = self.pages.write().unwrap().pop_front();
        if let (Some(mut page), Some(events)) = (page, &self.events) {
            page.job_id = job_id;
            let _ = events.send(ControllerEvent::PageResult(page));
        }
        Ok(())
    }
}

// =============================================================================
// Ingestion endpoint
// =============================================================================

/// An ingestion endpoint that remembers what it was sent and when.
#[derive(Default)]
pub struct MockIngestionEndpoint {
    deliveries: Arc<RwLock<Vec<(Instant, Record)>>>,
    failing_ids: HashSet<String>,
    preflight_error: Option<String>,
    latency: Duration,
}

impl MockIngestionEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject deliveries of the record with this id.
    pub fn with_failing_record(mut self, id: impl Into<String>) -> Self {
        self.failing_ids.insert(id.into());
        self
    }

    /// Fail the preflight check, making submission impossible.
    pub fn failing_preflight(mut self, message: impl Into<String>) -> Self {
        self.preflight_error = Some(message.into());
        self
    }

    /// Take this long to answer each delivery.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Records received, in delivery order (failed ones included).
    pub fn deliveries(&self) -> Vec<Record> {
        self.deliveries
            .read()
            .unwrap()
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn delivery_times(&self) -> Vec<Instant> {
        self.deliveries
            .read()
            .unwrap()
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        self.deliveries.read().unwrap().len()
    }
}

#[async_trait]
impl IngestionEndpoint for MockIngestionEndpoint {
    async fn preflight(&self) -> Result<()> {
        match &self.preflight_error {
            Some(message) => Err(HarvestError::Delivery(message.clone())),
            None => Ok(()),
        }
    }

    async fn deliver(&self, record: &Record) -> Result<DeliveryReceipt> {
        self.deliveries
            .write()
            .unwrap()
            .push((Instant::now(), record.clone()));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if record
            .id
            .as_ref()
            .is_some_and(|id| self.failing_ids.contains(id))
        {
            return Err(HarvestError::Delivery("HTTP 500".into()));
        }

        Ok(DeliveryReceipt {
            status: 200,
            body: Some(serde_json::json!({ "received": true })),
        })
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Keeps every notification for later inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Arc<RwLock<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().unwrap().clone()
    }

    pub fn for_job(&self, job_id: JobId) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.job_id() == job_id)
            .collect()
    }

    pub fn last_for(&self, job_id: JobId) -> Option<Notification> {
        self.for_job(job_id).pop()
    }

    /// Poll until `job_id` gets a `Done` or `Error` notification.
    ///
    /// Under a paused clock each poll advances virtual time, so this also
    /// lets pending pacing delays elapse.
    pub async fn wait_for_final(&self, job_id: JobId) -> Option<Notification> {
        for _ in 0..10_000 {
            if let Some(last) = self.for_job(job_id).into_iter().find(|n| n.is_final()) {
                return Some(last);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    /// Poll until `predicate` holds for some notification about `job_id`.
    pub async fn wait_for(
        &self,
        job_id: JobId,
        predicate: impl Fn(&Notification) -> bool,
    ) -> Option<Notification> {
        for _ in 0..10_000 {
            if let Some(found) = self.for_job(job_id).into_iter().find(|n| predicate(n)) {
                return Some(found);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

impl ProgressNotifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.write().unwrap().push(notification);
    }
}
