//! Delivery of unsolicited notifications.

use crate::domain::envelope::Notification;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Receives messages that carry no correlation id.
///
/// Called from the dispatcher task; implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification);
}

impl NotificationSink for mpsc::Sender<Notification> {
    fn deliver(&self, notification: Notification) {
        match self.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    method = dropped.method.as_deref().unwrap_or("<none>"),
                    "Notification channel full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Notification receiver dropped");
            }
        }
    }
}

impl NotificationSink for broadcast::Sender<Notification> {
    fn deliver(&self, notification: Notification) {
        // No subscribers is not an error
        let _ = self.send(notification);
    }
}
