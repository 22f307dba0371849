//! Fire-and-forget notifications to rider and driver apps.

use std::fmt;

use crate::domain::{DispatchEvent, EventBus, SharedClock};

/// Notification sender contract.
///
/// Delivery is at-least-once and unconfirmed; nothing in the core waits on
/// it or depends on it for correctness.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Sends `kind` with `payload` to a rider or driver.
    fn notify(&self, recipient: uuid::Uuid, kind: &str, payload: serde_json::Value);
}

/// Publishes notifications on the event bus, where WebSocket clients
/// subscribed to the recipient id pick them up.
#[derive(Debug, Clone)]
pub struct BusNotifier {
    bus: EventBus,
    clock: SharedClock,
}

impl BusNotifier {
    /// Creates a notifier publishing on `bus`.
    #[must_use]
    pub fn new(bus: EventBus, clock: SharedClock) -> Self {
        Self { bus, clock }
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, recipient: uuid::Uuid, kind: &str, payload: serde_json::Value) {
        let delivered = self.bus.publish(DispatchEvent::Notification {
            recipient_id: recipient,
            kind: kind.to_string(),
            payload,
            timestamp: self.clock.now(),
        });
        tracing::debug!(%recipient, kind, delivered, "notification sent");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::SystemClock;

    #[tokio::test]
    async fn notification_lands_on_the_bus() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let notifier = BusNotifier::new(bus, Arc::new(SystemClock));
        let rider = uuid::Uuid::new_v4();
        notifier.notify(rider, "fallback_quote", serde_json::json!({ "vtc_price": 2400 }));

        let Ok(DispatchEvent::Notification {
            recipient_id, kind, ..
        }) = rx.recv().await
        else {
            panic!("expected a notification");
        };
        assert_eq!(recipient_id, rider);
        assert_eq!(kind, "fallback_quote");
    }
}
