//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::persistence::PostgresPersistence;
use crate::service::DispatchService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Dispatch core for all business logic.
    pub dispatch: Arc<DispatchService>,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
    /// Durable event log, when enabled.
    pub persistence: Option<PostgresPersistence>,
}

impl AppState {
    /// State around `dispatch`, sharing its event bus.
    #[must_use]
    pub fn new(dispatch: Arc<DispatchService>, persistence: Option<PostgresPersistence>) -> Self {
        let event_bus = dispatch.event_bus().clone();
        Self {
            dispatch,
            event_bus,
            persistence,
        }
    }
}
