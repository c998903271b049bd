//! Paginated Review Extraction Orchestrator
//!
//! Drives long-running extraction jobs over a paginated review source: one
//! browser surface per job, page by page, deduplicating records and watching
//! for pagination that has stopped advancing, then hands the collected set
//! to an ingestion service in paced batches.
//!
//! # Design
//!
//! - Every job mutation is persisted through an injected [`JobStore`]
//! - Collaborators (browser, extractor, ingestion, observer) are traits
//! - Inbound events are one closed enum, [`ControllerEvent`]
//! - Page-result decisions are pure ([`machine`]); the controller does the IO
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvester::{Controller, ControllerHandle, HarvestConfig, HttpIngestionEndpoint};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let (events_tx, events_rx) = mpsc::unbounded_channel();
//! let controller = Controller::builder()
//!     .with_driver(Arc::new(my_browser.with_events(events_tx.clone())))
//!     .with_extractor(Arc::new(my_extractor.with_events(events_tx.clone())))
//!     .with_endpoint(Arc::new(HttpIngestionEndpoint::new("http://localhost:3000/api/analyze/")))
//!     .with_config(HarvestConfig::from_env()?)
//!     .build()?;
//! controller.rehydrate().await?;
//! controller.spawn(events_rx);
//!
//! let handle = ControllerHandle::new(events_tx);
//! let job_id = handle.start("https://www.amazon.com/dp/B0ABCDEF12").await?;
//! ```
//!
//! # Modules
//!
//! - [`controller`] - Job controller, builder and event loop
//! - [`machine`] - Pure page-result transitions
//! - [`dedup`] / [`stuck`] / [`locator`] - Record dedup, stuck detection, locator keys
//! - [`ingestion`] - Batch submitter and HTTP endpoint
//! - [`stores`] - Job store implementations
//! - [`notify`] - Observer notifiers
//! - [`queries`] - Read-only views for observers and operators
//! - [`testing`] - Mock collaborators

pub mod config;
pub mod controller;
pub mod dedup;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod locator;
pub mod machine;
pub mod notify;
pub mod queries;
pub mod stores;
pub mod stuck;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use config::{AppConfig, HarvestConfig};
pub use controller::{Controller, ControllerBuilder, ControllerHandle};
pub use error::{HarvestError, JobFailure, Result};
pub use events::{ControllerEvent, Notification};
pub use traits::{
    extractor::PageExtractor,
    ingestion::{DeliveryReceipt, IngestionEndpoint},
    notifier::ProgressNotifier,
    store::JobStore,
    surface::SurfaceDriver,
};
pub use types::{
    job::{Job, JobId, JobStatus},
    page::{PageResult, SurfaceHandle},
    record::Record,
};

pub use ingestion::{BatchSubmitter, HttpIngestionEndpoint, SubmissionReport};
pub use locator::normalize_locator;
pub use notify::{BroadcastNotifier, TracingNotifier};
pub use queries::JobSummary;

// Re-export stores
pub use stores::MemoryJobStore;
#[cfg(feature = "sqlite")]
pub use stores::SqliteJobStore;
