//! Database models for the dispatch event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A stored event row from the `dispatch_events` table.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredEvent {
    /// Auto-increment row ID.
    pub id: i64,
    /// Entity the event is keyed by (request, offer, trip, hold, ...).
    pub entity_id: Uuid,
    /// Event type discriminator (e.g. `"trip_status_changed"`).
    pub event_type: String,
    /// JSONB payload: the full serialized event.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Time the event happened in the core.
    pub occurred_at: DateTime<Utc>,
    /// Server-side insertion timestamp.
    pub created_at: DateTime<Utc>,
}

pub(crate) type EventRow = (i64, Uuid, String, serde_json::Value, DateTime<Utc>, DateTime<Utc>);

impl From<EventRow> for StoredEvent {
    fn from((id, entity_id, event_type, payload, occurred_at, created_at): EventRow) -> Self {
        Self {
            id,
            entity_id,
            event_type,
            payload,
            occurred_at,
            created_at,
        }
    }
}
