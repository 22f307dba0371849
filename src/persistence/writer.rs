//! Background task draining the event bus into the event log.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::PostgresPersistence;
use crate::domain::EventBus;

/// Spawns the task appending every published event to `persistence`.
///
/// Failed writes are logged and skipped. The task ends when the bus is
/// dropped.
pub fn spawn_event_log_writer(bus: &EventBus, persistence: PostgresPersistence) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        tracing::info!("event log writer started");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = persistence.append_event(&event).await {
                        tracing::warn!(
                            event_type = event.event_type_str(),
                            entity_id = %event.entity_id(),
                            error = %e,
                            "event not persisted"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log writer lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("event log writer stopped");
    })
}
