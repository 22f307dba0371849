//! PostgreSQL implementation of the persistence layer.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{EventRow, StoredEvent};
use crate::domain::DispatchEvent;
use crate::error::DispatchError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS dispatch_events (\
        id BIGSERIAL PRIMARY KEY, \
        entity_id UUID NOT NULL, \
        event_type TEXT NOT NULL, \
        payload JSONB NOT NULL, \
        occurred_at TIMESTAMPTZ NOT NULL, \
        created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
    "CREATE INDEX IF NOT EXISTS dispatch_events_entity_idx \
        ON dispatch_events (entity_id, id)",
    "CREATE INDEX IF NOT EXISTS dispatch_events_occurred_idx \
        ON dispatch_events (occurred_at)",
];

const SELECT_COLUMNS: &str =
    "SELECT id, entity_id, event_type, payload, occurred_at, created_at FROM dispatch_events";

fn db_error(e: sqlx::Error) -> DispatchError {
    DispatchError::PersistenceError(e.to_string())
}

/// PostgreSQL-backed event log using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Creates a new persistence layer with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the event table and its indexes if they are missing.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError::PersistenceError`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), DispatchError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        Ok(())
    }

    /// Appends an event to the log.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError::PersistenceError`] on database failure
    /// and [`DispatchError::Internal`] if the event does not serialize.
    pub async fn append_event(&self, event: &DispatchEvent) -> Result<i64, DispatchError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| DispatchError::Internal(format!("event serialization: {e}")))?;
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO dispatch_events (entity_id, event_type, payload, occurred_at) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(event.entity_id())
        .bind(event.event_type_str())
        .bind(payload)
        .bind(event.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Every event keyed by `entity_id`, in append order.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError::PersistenceError`] on database failure.
    pub async fn load_events_for(&self, entity_id: Uuid) -> Result<Vec<StoredEvent>, DispatchError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{SELECT_COLUMNS} WHERE entity_id = $1 ORDER BY id ASC"
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    /// Events that happened after `after`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError::PersistenceError`] on database failure.
    pub async fn load_events_after(
        &self,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{SELECT_COLUMNS} WHERE occurred_at > $1 ORDER BY occurred_at ASC, id ASC LIMIT $2"
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }
}
