//! End-to-end job flows through the event loop with mock collaborators.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use harvester::testing::{
    MockIngestionEndpoint, MockPageExtractor, MockSurfaceDriver, RecordingNotifier,
};
use harvester::{
    Controller, ControllerHandle, HarvestConfig, HarvestError, JobFailure, JobStatus, JobStore,
    MemoryJobStore, Notification, PageResult, Record, SurfaceHandle,
};

const SOURCE: &str = "https://www.amazon.com/Quiet-Fan/dp/B0ABCDEF12/ref=sr_1_1";

fn review_page(n: u32) -> String {
    format!(
        "https://www.amazon.com/product-reviews/B0ABCDEF12/ref=cm_cr_arp_d_paging_btm_next_{n}\
         ?ie=UTF8&reviewerType=all_reviews&pageNumber={n}"
    )
}

fn reviews(range: std::ops::Range<u32>) -> Vec<Record> {
    range
        .map(|i| {
            Record::new(Some(format!("R{i:04}")), format!("Review number {i}"))
                .with_field("rating", 4.0)
                .with_field("title", format!("Title {i}"))
        })
        .collect()
}

/// Page `n` of a 10-per-page listing, linking to page `n + 1` unless last.
fn page(n: u32, records: Vec<Record>, last: bool) -> PageResult {
    let result = PageResult::default()
        .with_records(records)
        .with_page(n)
        .with_totals(30, 3);
    if last {
        result
    } else {
        result.with_next(review_page(n + 1))
    }
}

struct Harness {
    controller: Arc<Controller>,
    handle: ControllerHandle,
    store: Arc<MemoryJobStore>,
    driver: Arc<MockSurfaceDriver>,
    extractor: Arc<MockPageExtractor>,
    endpoint: Arc<MockIngestionEndpoint>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(extractor: MockPageExtractor) -> Self {
        Self::with(
            extractor,
            MockSurfaceDriver::new(),
            MockIngestionEndpoint::new(),
            HarvestConfig::default(),
        )
    }

    fn with(
        extractor: MockPageExtractor,
        driver: MockSurfaceDriver,
        endpoint: MockIngestionEndpoint,
        config: HarvestConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let store = Arc::new(MemoryJobStore::new());
        let driver = Arc::new(driver.with_events(events_tx.clone()));
        let extractor = Arc::new(extractor.with_events(events_tx.clone()));
        let endpoint = Arc::new(endpoint);
        let notifier = Arc::new(RecordingNotifier::new());

        let controller = Controller::builder()
            .with_store(store.clone())
            .with_driver(driver.clone())
            .with_extractor(extractor.clone())
            .with_endpoint(endpoint.clone())
            .with_notifier(notifier.clone())
            .with_config(config)
            .build()
            .unwrap();
        controller.spawn(events_rx);

        Self {
            controller,
            handle: ControllerHandle::new(events_tx),
            store,
            driver,
            extractor,
            endpoint,
            notifier,
        }
    }

    async fn surface_of(&self, job_id: harvester::JobId) -> SurfaceHandle {
        self.store.get(job_id).await.unwrap().unwrap().surface.unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_pages_reach_done_with_all_records() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), false),
        page(2, reviews(10..20), false),
        page(3, reviews(20..30), true),
    ]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;

    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    assert_eq!(last, Notification::Done { job_id, total: 30 });

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.collected_count(), 30);
    assert_eq!(job.total_count, Some(30));
    assert_eq!(job.current_page, Some(3));
    assert!(job.surface.is_none());

    assert_eq!(h.driver.navigations(), vec![review_page(2), review_page(3)]);
    assert_eq!(h.driver.close_count(surface), 1);
    assert_eq!(h.endpoint.delivered_count(), 30);

    // Submission phase was announced before completion
    assert!(h.notifier.for_job(job_id).iter().any(|n| matches!(
        n,
        Notification::Progress { status: JobStatus::Sending, message: Some(_), .. }
    )));

    // Removed once the grace period has passed
    tokio::time::sleep(h.controller.config().removal_grace + Duration::from_millis(10)).await;
    assert!(h.store.get(job_id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_navigation_is_paced() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), false),
        page(2, reviews(10..20), true),
    ]);
    let h = Harness::new(extractor);

    let started = tokio::time::Instant::now();
    let job_id = h.handle.start(SOURCE).await.unwrap();
    h.notifier.wait_for_final(job_id).await.unwrap();

    // settle (page 1) + pacing + settle (page 2)
    let config = HarvestConfig::default();
    assert!(started.elapsed() >= config.settle_delay * 2 + config.page_delay);
    assert_eq!(h.extractor.scrape_requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_on_page_two_keeps_surface() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), false),
        PageResult::challenge(Default::default()),
    ]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;

    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    assert_eq!(last, Notification::error(job_id, &JobFailure::ChallengeDetected));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.surface, Some(surface));
    assert!(h.driver.is_open(surface));
    assert_eq!(h.driver.close_count(surface), 0);

    // Cancelling afterwards releases it and drops the job
    h.handle.cancel(job_id).await.unwrap();
    assert_eq!(h.driver.close_count(surface), 1);
    assert!(h.store.get(job_id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_running_releases_once() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), false),
        page(2, reviews(10..20), false),
    ]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;

    h.notifier
        .wait_for(job_id, |n| matches!(n, Notification::Progress { current: 10, .. }))
        .await
        .unwrap();
    h.handle.cancel(job_id).await.unwrap();

    assert!(h.store.get(job_id).await.unwrap().is_none());
    assert_eq!(
        h.notifier.last_for(job_id),
        Some(Notification::error(job_id, &JobFailure::UserCancelled))
    );

    // The pending navigation must not fire after the pacing delay
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.driver.navigations().is_empty());
    assert_eq!(h.driver.close_count(surface), 1);
}

#[tokio::test(start_paused = true)]
async fn test_three_duplicate_pages_fail_two_do_not() {
    let dup = || PageResult::default().with_records(reviews(0..10));
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        dup().with_next(review_page(2)),
        dup().with_next(review_page(3)),
        dup().with_next(review_page(4)),
        dup().with_next(review_page(5)),
    ]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;

    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    assert_eq!(last, Notification::error(job_id, &JobFailure::PaginationStuck));

    // Page 1 is new, pages 2 and 3 are tolerated, page 4 trips the detector
    assert_eq!(h.extractor.scrape_requests().len(), 4);
    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.collected_count(), 10);
    assert_eq!(job.stuck_count, 3);
    assert_eq!(h.driver.close_count(surface), 1);
}

#[tokio::test(start_paused = true)]
async fn test_page_over_cap_with_next_link_fails() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), false),
        PageResult::default()
            .with_records(reviews(10..20))
            .with_page(101)
            .with_next(review_page(102)),
    ]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    assert_eq!(
        last,
        Notification::error(job_id, &JobFailure::SafetyLimitExceeded { limit: 100 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_next_link_back_to_current_page_is_a_loop() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), false),
        PageResult::default()
            .with_records(reviews(10..20))
            .with_page(2)
            .with_next(format!("{}&ref=pd_rd", review_page(2))),
    ]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    assert_eq!(last, Notification::error(job_id, &JobFailure::PaginationStuck));
    assert_eq!(h.driver.navigations(), vec![review_page(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_navigating_off_the_review_pages_fails() {
    let extractor =
        MockPageExtractor::new(review_page(1)).with_pages([page(1, reviews(0..10), false)]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;
    h.driver
        .redirect_next_navigation("https://www.amazon.com/ap/signin?openid.return_to=x");

    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    match last {
        Notification::Error { error, .. } => assert!(error.contains("/ap/signin")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(h.driver.close_count(surface), 1);
}

#[tokio::test(start_paused = true)]
async fn test_surface_closed_by_user_cancels_job() {
    let extractor =
        MockPageExtractor::new(review_page(1)).with_pages([page(1, reviews(0..10), false)]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;
    h.notifier
        .wait_for(job_id, |n| matches!(n, Notification::Progress { current: 10, .. }))
        .await
        .unwrap();

    h.driver.close_externally(surface);
    let last = h.notifier.wait_for_final(job_id).await.unwrap();
    assert_eq!(last, Notification::error(job_id, &JobFailure::SurfaceLostExternally));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.store.get(job_id).await.unwrap().is_none());
    assert!(h.driver.navigations().is_empty());
    assert_eq!(h.driver.close_count(surface), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_first_page_opens_nothing() {
    let h = Harness::new(MockPageExtractor::unresolvable("no 'see all reviews' link"));

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let last = h.notifier.wait_for_final(job_id).await.unwrap();

    assert!(matches!(
        last,
        Notification::Error { ref error, .. } if error.contains("see all reviews")
    ));
    assert!(h.driver.opened().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_source_is_rejected() {
    let h = Harness::new(MockPageExtractor::new(review_page(1)));
    let err = h
        .handle
        .start("https://www.amazon.com/gp/cart/view.html")
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::InvalidSource { .. }));
    assert!(h.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_extractor_error_drops_job_immediately() {
    let extractor = MockPageExtractor::new(review_page(1))
        .with_pages([PageResult::failed(Default::default(), "review list not found")]);
    let h = Harness::new(extractor);

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;
    let last = h.notifier.wait_for_final(job_id).await.unwrap();

    assert!(matches!(
        last,
        Notification::Error { ref error, .. } if error.contains("review list not found")
    ));
    // No removal grace for extractor failures
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.store.get(job_id).await.unwrap().is_none());
    assert_eq!(h.driver.close_count(surface), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_that_cannot_run_fails_the_job() {
    let extractor =
        MockPageExtractor::new(review_page(1)).with_pages([page(1, reviews(0..10), true)]);
    let h = Harness::with(
        extractor,
        MockSurfaceDriver::new(),
        MockIngestionEndpoint::new().failing_preflight("connection refused"),
        HarvestConfig::default(),
    );

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let last = h.notifier.wait_for_final(job_id).await.unwrap();

    match last {
        Notification::Error { error, .. } => {
            assert!(error.starts_with("failed to submit records"));
            assert!(error.contains("connection refused"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(h.endpoint.delivered_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_individual_delivery_failures_still_finish() {
    let extractor =
        MockPageExtractor::new(review_page(1)).with_pages([page(1, reviews(0..25), true)]);
    let h = Harness::with(
        extractor,
        MockSurfaceDriver::new(),
        MockIngestionEndpoint::new().with_failing_record("R0003"),
        HarvestConfig::default(),
    );

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let last = h.notifier.wait_for_final(job_id).await.unwrap();

    assert_eq!(last, Notification::Done { job_id, total: 25 });
    assert_eq!(h.endpoint.delivered_count(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_submission_stops_remaining_batches() {
    let extractor =
        MockPageExtractor::new(review_page(1)).with_pages([page(1, reviews(0..45), true)]);
    let h = Harness::with(
        extractor,
        MockSurfaceDriver::new(),
        MockIngestionEndpoint::new(),
        HarvestConfig::default(),
    );

    let job_id = h.handle.start(SOURCE).await.unwrap();
    h.notifier
        .wait_for(job_id, |n| {
            matches!(n, Notification::Progress { status: JobStatus::Sending, .. })
        })
        .await
        .unwrap();
    h.handle.cancel(job_id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.endpoint.delivered_count() < 45);
    assert!(!h
        .notifier
        .for_job(job_id)
        .iter()
        .any(|n| matches!(n, Notification::Done { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_jobs_run_side_by_side_on_their_own_surfaces() {
    let extractor = MockPageExtractor::new(review_page(1)).with_pages([
        page(1, reviews(0..10), true),
        page(1, reviews(100..110), true),
    ]);
    let h = Harness::new(extractor);

    let first = h.handle.start(SOURCE).await.unwrap();
    let second = h
        .handle
        .start("https://www.amazon.com/gp/product/B0ABCDEF12")
        .await
        .unwrap();
    assert_ne!(h.surface_of(first).await, h.surface_of(second).await);

    assert_eq!(
        h.notifier.wait_for_final(first).await,
        Some(Notification::Done { job_id: first, total: 10 })
    );
    assert_eq!(
        h.notifier.wait_for_final(second).await,
        Some(Notification::Done { job_id: second, total: 10 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_open_does_not_hold_up_other_jobs() {
    let h = Harness::with(
        MockPageExtractor::new(review_page(1)),
        MockSurfaceDriver::new().stalling_open_after(1),
        MockIngestionEndpoint::new(),
        HarvestConfig::default(),
    );

    let first = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(first).await;

    let controller = Arc::clone(&h.controller);
    tokio::spawn(async move {
        let _ = controller
            .start("https://www.amazon.com/gp/product/B0ABCDEF12")
            .await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancelled = tokio::time::timeout(Duration::from_secs(2), h.handle.cancel(first)).await;
    assert!(matches!(cancelled, Ok(Ok(()))));
    assert!(h.store.get(first).await.unwrap().is_none());
    assert_eq!(h.driver.close_count(surface), 1);

    // The second job is still waiting on its browser
    let jobs = h.store.list().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Starting);
    assert!(jobs[0].surface.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_fails_job_without_surface() {
    let h = Harness::with(
        MockPageExtractor::new(review_page(1)),
        MockSurfaceDriver::new().failing_open("browser process exited"),
        MockIngestionEndpoint::new(),
        HarvestConfig::default(),
    );

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let last = h.notifier.wait_for_final(job_id).await.unwrap();

    match last {
        Notification::Error { error, .. } => {
            assert!(error.starts_with("navigation to the next page failed"));
            assert!(error.contains("browser process exited"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.surface.is_none());
    assert!(h.driver.opened().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_navigate_failure_on_page_two_releases_surface() {
    let extractor =
        MockPageExtractor::new(review_page(1)).with_pages([page(1, reviews(0..10), false)]);
    let h = Harness::with(
        extractor,
        MockSurfaceDriver::new().failing_navigate("target closed"),
        MockIngestionEndpoint::new(),
        HarvestConfig::default(),
    );

    let job_id = h.handle.start(SOURCE).await.unwrap();
    let surface = h.surface_of(job_id).await;
    let last = h.notifier.wait_for_final(job_id).await.unwrap();

    assert_eq!(
        last,
        Notification::error(job_id, &JobFailure::Navigation("surface error: target closed".into()))
    );
    assert_eq!(h.driver.navigations(), vec![review_page(2)]);
    assert_eq!(h.driver.close_count(surface), 1);

    let job = h.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.surface.is_none());
}
