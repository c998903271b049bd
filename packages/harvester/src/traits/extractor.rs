//! Page extractor trait.
//!
//! How records are parsed out of a page is entirely the extractor's
//! business. The controller only asks for two things.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{job::JobId, page::SurfaceHandle};

#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Resolve the first paginated-source locator while positioned on the
    /// origin page. An `Err` means no locator could be found.
    async fn resolve_first_locator(&self, source_url: &str) -> Result<String>;

    /// Ask for the page currently loaded on `surface` to be scraped.
    ///
    /// Returns once the request is accepted. The result arrives later as
    /// `ControllerEvent::PageResult`.
    async fn request_scrape(&self, job_id: JobId, surface: SurfaceHandle) -> Result<()>;
}
