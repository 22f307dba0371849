//! Broadcast channel for dispatch events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Every state
//! mutation publishes a [`DispatchEvent`] through the bus; WebSocket
//! connections and the event-log writer subscribe to it.

use tokio::sync::broadcast;

use super::DispatchEvent;

/// Broadcast bus for [`DispatchEvent`]s.
///
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that got the event; with no receivers
    /// the event is dropped.
    pub fn publish(&self, event: DispatchEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Publishes a batch in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = DispatchEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Creates a receiver for all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ids::{RequestId, RiderId};
    use chrono::Utc;

    fn opened(request_id: RequestId) -> DispatchEvent {
        DispatchEvent::RequestOpened {
            request_id,
            rider_id: RiderId::new(),
            expires_at: Utc::now(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(opened(RequestId::new())), 0);
    }

    #[tokio::test]
    async fn every_subscriber_sees_batch_in_order() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let first = RequestId::new();
        let second = RequestId::new();
        bus.publish_all([opened(first), opened(second)]);

        for rx in [&mut rx1, &mut rx2] {
            let Ok(a) = rx.recv().await else {
                panic!("expected first event");
            };
            let Ok(b) = rx.recv().await else {
                panic!("expected second event");
            };
            assert_eq!(a.entity_id(), *first.as_uuid());
            assert_eq!(b.entity_id(), *second.as_uuid());
        }
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }
}
