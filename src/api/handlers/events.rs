//! Event log handlers, backed by the Postgres event writer.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app_state::AppState;
use crate::error::{DispatchError, ErrorResponse};
use crate::persistence::{PostgresPersistence, StoredEvent};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Query parameters for reading the log in time order.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Only events that occurred after this instant. Defaults to the start
    /// of the log.
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
    /// Maximum number of events (1-1000). Defaults to 100.
    #[serde(default)]
    pub limit: Option<i64>,
}

fn persistence(state: &AppState) -> Result<&PostgresPersistence, DispatchError> {
    state.persistence.as_ref().ok_or_else(|| {
        DispatchError::PersistenceError("event log is disabled".to_string())
    })
}

/// `GET /events/{entity_id}` — Every stored event touching one entity.
///
/// # Errors
///
/// Returns [`DispatchError::PersistenceError`] when the log is disabled or
/// the database fails.
#[utoipa::path(
    get,
    path = "/api/v1/events/{entity_id}",
    tag = "Events",
    summary = "Events for an entity",
    params(("entity_id" = uuid::Uuid, Path, description = "Request, trip, vehicle, wallet or booking ID")),
    responses(
        (status = 200, description = "Events, oldest first", body = Vec<StoredEvent>),
        (status = 500, description = "Event log unavailable", body = ErrorResponse),
    )
)]
pub async fn for_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<uuid::Uuid>,
) -> Result<Json<Vec<StoredEvent>>, DispatchError> {
    Ok(Json(persistence(&state)?.load_events_for(entity_id).await?))
}

/// `GET /events` — Stored events in time order.
///
/// # Errors
///
/// Returns [`DispatchError::PersistenceError`] when the log is disabled or
/// the database fails.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Read the event log",
    params(EventsQuery),
    responses(
        (status = 200, description = "Events, oldest first", body = Vec<StoredEvent>),
        (status = 500, description = "Event log unavailable", body = ErrorResponse),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<StoredEvent>>, DispatchError> {
    let after = query.after.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(persistence(&state)?.load_events_after(after, limit).await?))
}

/// Event log routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(list))
        .route("/events/{entity_id}", get(for_entity))
}
