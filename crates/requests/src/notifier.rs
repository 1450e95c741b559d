//! "New requests may be available" signal between generators and the driver.

use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes the driver so it polls its generators again.
///
/// A notification sent while the driver is busy is remembered, so a wake-up
/// fired between two polls is never lost. Several notifications collapse into
/// one poll.
#[derive(Debug, Clone, Default)]
pub struct NewRequestsNotifier {
    notify: Arc<Notify>,
}

impl NewRequestsNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_new_requests_available(&self) {
        tracing::trace!("new requests available");
        self.notify.notify_one();
    }

    /// Wait for the next notification.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn notification_before_waiting_is_not_lost() {
        let notifier = NewRequestsNotifier::new();
        notifier.notify_new_requests_available();

        tokio::time::timeout(Duration::from_millis(50), notifier.notified())
            .await
            .expect("stored notification should wake the waiter");
    }
}
