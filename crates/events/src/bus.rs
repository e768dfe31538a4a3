//! Push-stream sink backed by a `tokio::sync::broadcast` channel.
//!
//! [`ProgressBus`] is shared via `Arc<ProgressBus>` between the sync engine
//! and whatever forwards events to interactive clients.

use tokio::sync::broadcast;

use crate::progress::{ProgressEvent, ProgressSink};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out of progress events.
///
/// # Usage
///
/// ```rust
/// use gallery_events::{ProgressBus, ProgressEvent, ProgressSink};
///
/// let bus = ProgressBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.report(ProgressEvent::complete(0));
/// ```
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest events are overwritten and a slow
    /// receiver observes `RecvError::Lagged` instead of blocking the sender.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressSink for ProgressBus {
    fn report(&self, event: ProgressEvent) {
        // A send error only means nobody is listening.
        if self.sender.send(event).is_err() {
            tracing::trace!("Progress event dropped, no subscribers");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Phase;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let bus = ProgressBus::default();
        let mut rx = bus.subscribe();

        bus.report(ProgressEvent::new(Phase::Processing, 1, 2).with_root("/media"));
        bus.report(ProgressEvent::complete(2));

        let first = rx.recv().await.expect("should receive progress");
        assert_eq!(first.processed, 1);
        assert_eq!(first.root.as_deref(), Some("/media"));

        let last = rx.recv().await.expect("should receive completion");
        assert!(last.is_complete());
    }

    #[test]
    fn report_without_subscribers_does_not_panic() {
        let bus = ProgressBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.report(ProgressEvent::complete(0));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = ProgressBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.report(ProgressEvent::new(Phase::Processing, i, 5));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        let next = rx.recv().await.expect("newest events are retained");
        assert_eq!(next.processed, 3);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_tolerated() {
        let bus = ProgressBus::default();
        let rx = bus.subscribe();
        drop(rx);
        bus.report(ProgressEvent::complete(1));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
