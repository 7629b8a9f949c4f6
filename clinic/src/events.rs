//! Broadcast of committed domain events.

use clinic_core::ClinicEvent;
use tokio::sync::broadcast;

/// Fan-out of [`ClinicEvent`]s to any number of subscribers.
///
/// Publishing never blocks and never fails the operation that produced the
/// event: with no subscribers the event is dropped, and a subscriber that
/// falls more than the buffer size behind observes `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ClinicEvent>,
}

impl EventPublisher {
    /// Creates a publisher buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to current subscribers
    pub fn publish(&self, event: ClinicEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(event = name, receivers, "Event published"),
            Err(_) => tracing::trace!(event = name, "Event dropped, no subscribers"),
        }
    }

    /// New subscription receiving events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClinicEvent> {
        self.sender.subscribe()
    }
}
