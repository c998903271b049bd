//! Tab driver trait: the browsing surfaces jobs paginate through.
//!
//! Load completion and external closure are not return values here. The
//! driver reports them asynchronously as `ControllerEvent::NavigationComplete`
//! and `ControllerEvent::SurfaceClosed`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::page::SurfaceHandle;

#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// Open a new surface at `locator`.
    async fn open(&self, locator: &str) -> Result<SurfaceHandle>;

    /// Point an open surface at `locator`.
    async fn navigate(&self, handle: SurfaceHandle, locator: &str) -> Result<()>;

    /// Close a surface.
    async fn close(&self, handle: SurfaceHandle) -> Result<()>;

    /// Where the surface currently is, or `None` if it no longer exists.
    async fn current_location(&self, handle: SurfaceHandle) -> Result<Option<String>>;
}
