//! Per-connection subscription manager.
//!
//! Tracks which entity ids a WebSocket client follows and filters events
//! server-side against every id an event concerns.

use std::collections::HashSet;

use crate::domain::DispatchEvent;

/// Manages the set of subscriptions for a single WebSocket connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Subscribed ids. Ignored while `subscribe_all` is set.
    ids: HashSet<uuid::Uuid>,
    /// Whether the client subscribed with the `"*"` wildcard.
    subscribe_all: bool,
}

impl SubscriptionManager {
    /// Creates a new empty subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds ids to the subscription set.
    pub fn subscribe(&mut self, ids: &[uuid::Uuid], wildcard: bool) {
        if wildcard {
            self.subscribe_all = true;
        }
        self.ids.extend(ids.iter().copied());
    }

    /// Removes ids from the subscription set.
    pub fn unsubscribe(&mut self, ids: &[uuid::Uuid]) {
        for id in ids {
            self.ids.remove(id);
        }
    }

    /// Returns `true` if the event concerns a subscribed id.
    #[must_use]
    pub fn matches(&self, event: &DispatchEvent) -> bool {
        self.subscribe_all || event.related_ids().iter().any(|id| self.ids.contains(id))
    }

    /// Number of explicitly subscribed ids.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the wildcard subscription is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}
