//! Observer notification trait.

use std::sync::Arc;

use crate::events::Notification;

/// Best-effort publication of job state changes.
///
/// Implementations must not block and must not fail: an observer that is
/// not listening simply misses the update.
pub trait ProgressNotifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<N: ProgressNotifier + ?Sized> ProgressNotifier for Arc<N> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}
