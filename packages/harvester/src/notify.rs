//! Progress notifier implementations.
//!
//! Publication is fire-and-forget: nobody listening is not an error.

use tokio::sync::broadcast;
use tracing::info;

use crate::events::Notification;
use crate::traits::notifier::ProgressNotifier;

/// Fans notifications out to any number of observers over a tokio
/// broadcast channel. Slow observers lag and lose the oldest updates.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressNotifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        // Err only means there are no receivers right now
        let _ = self.sender.send(notification);
    }
}

/// Writes every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl ProgressNotifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Progress {
                job_id,
                status,
                message,
                current,
                total,
                current_page,
                total_pages,
            } => info!(
                job_id = %job_id,
                status = %status,
                message = ?message,
                current,
                total = ?total,
                page = ?current_page,
                total_pages = ?total_pages,
                "Job progress"
            ),
            Notification::Done { job_id, total } => {
                info!(job_id = %job_id, total, "Job done")
            }
            Notification::Error { job_id, error } => {
                info!(job_id = %job_id, error = %error, "Job error")
            }
        }
    }
}
