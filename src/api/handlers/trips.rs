//! Trip handlers: pickup, presence, progress, completion, cancellation.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::common_dto::{Page, PaginationParams};
use crate::api::dto::trip_dto::{
    AdvanceTripRequest, CancelTripRequest, PositionsRequest, PresenceView,
};
use crate::app_state::AppState;
use crate::domain::{PresenceValidation, Trip, TripId};
use crate::error::{DispatchError, ErrorResponse};
use crate::service::{ArrivalReport, PresenceCheck};

/// `GET /trips` — List trips, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/trips",
    tag = "Trips",
    summary = "List trips",
    params(PaginationParams),
    responses(
        (status = 200, description = "Page of trips", body = Page<Trip>),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Json<Page<Trip>> {
    let mut trips = state.dispatch.trips().list().await;
    trips.sort_by_key(|t| std::cmp::Reverse(t.created_at()));
    Json(pagination.paginate(trips))
}

/// `GET /trips/{id}` — Get a trip.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown trip.
#[utoipa::path(
    get,
    path = "/api/v1/trips/{id}",
    tag = "Trips",
    summary = "Get a trip",
    params(("id" = TripId, Path, description = "Trip ID")),
    responses(
        (status = 200, description = "Trip", body = Trip),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
) -> Result<Json<Trip>, DispatchError> {
    Ok(Json(state.dispatch.trips().trip(id).await?))
}

/// `POST /trips/{id}/arrival` — Driver reports arrival at the pickup.
///
/// # Errors
///
/// Returns [`DispatchError::GeolocationUnavailable`] when a position is
/// missing and [`DispatchError::InvalidTransition`] after pickup.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/arrival",
    tag = "Trips",
    summary = "Report driver arrival",
    description = "Measures the driver-rider distance. Inside the pickup zone the trip moves to `waiting` and the client-wait timer starts.",
    params(("id" = TripId, Path, description = "Trip ID")),
    request_body = PositionsRequest,
    responses(
        (status = 200, description = "Arrival recorded", body = ArrivalReport),
        (status = 409, description = "Trip past pickup", body = ErrorResponse),
        (status = 503, description = "Position unavailable", body = ErrorResponse),
    )
)]
pub async fn report_arrival(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
    Json(req): Json<PositionsRequest>,
) -> Result<Json<ArrivalReport>, DispatchError> {
    Ok(Json(state.dispatch.report_arrival(id, req.driver, req.rider).await?))
}

/// `POST /trips/{id}/check` — Periodic presence check.
///
/// # Errors
///
/// Returns [`DispatchError::GeolocationUnavailable`] when a position is
/// missing.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/check",
    tag = "Trips",
    summary = "Check driver-rider proximity",
    params(("id" = TripId, Path, description = "Trip ID")),
    request_body = PositionsRequest,
    responses(
        (status = 200, description = "Check recorded", body = PresenceCheck),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 503, description = "Position unavailable", body = ErrorResponse),
    )
)]
pub async fn check_position(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
    Json(req): Json<PositionsRequest>,
) -> Result<Json<PresenceCheck>, DispatchError> {
    Ok(Json(state.dispatch.check_position(id, req.driver, req.rider).await?))
}

/// `POST /trips/{id}/boarding` — Driver confirms the client is aboard.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] unless the trip waits at
/// the pickup.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/boarding",
    tag = "Trips",
    summary = "Confirm boarding",
    params(("id" = TripId, Path, description = "Trip ID")),
    responses(
        (status = 200, description = "Client aboard", body = Trip),
        (status = 409, description = "Trip not at pickup", body = ErrorResponse),
    )
)]
pub async fn confirm_boarding(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
) -> Result<Json<Trip>, DispatchError> {
    Ok(Json(state.dispatch.confirm_boarding(id).await?))
}

/// `POST /trips/{id}/advance` — Progress report while on board.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] before boarding.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/advance",
    tag = "Trips",
    summary = "Report trip progress",
    description = "Moves the trip towards the destination as the ETA drops, completing it on arrival.",
    params(("id" = TripId, Path, description = "Trip ID")),
    request_body = AdvanceTripRequest,
    responses(
        (status = 200, description = "Trip after the report", body = Trip),
        (status = 409, description = "Trip not on board", body = ErrorResponse),
    )
)]
pub async fn advance(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
    Json(req): Json<AdvanceTripRequest>,
) -> Result<Json<Trip>, DispatchError> {
    Ok(Json(state.dispatch.advance_trip(id, req.position).await?))
}

/// `POST /trips/{id}/complete` — Driver confirms the drop-off.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] before boarding.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/complete",
    tag = "Trips",
    summary = "Complete a trip",
    description = "Settles the fare from the booking hold and frees the seat.",
    params(("id" = TripId, Path, description = "Trip ID")),
    responses(
        (status = 200, description = "Trip completed", body = Trip),
        (status = 409, description = "Trip not on board", body = ErrorResponse),
    )
)]
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
) -> Result<Json<Trip>, DispatchError> {
    Ok(Json(state.dispatch.complete_trip(id).await?))
}

/// `POST /trips/{id}/cancel` — Cancel a trip before boarding.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] once the client is aboard.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/cancel",
    tag = "Trips",
    summary = "Cancel a trip",
    description = "Applies the presence outcome: a penalty when the timer ran out with the driver in zone, a full release otherwise.",
    params(("id" = TripId, Path, description = "Trip ID")),
    request_body = CancelTripRequest,
    responses(
        (status = 200, description = "Trip cancelled", body = Trip),
        (status = 409, description = "Trip past pickup", body = ErrorResponse),
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
    Json(req): Json<CancelTripRequest>,
) -> Result<Json<Trip>, DispatchError> {
    Ok(Json(state.dispatch.cancel_trip(id, req.cancelled_by).await?))
}

/// `GET /trips/{id}/presence` — Presence state for UI rendering.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] when the trip has no validation.
#[utoipa::path(
    get,
    path = "/api/v1/trips/{id}/presence",
    tag = "Trips",
    summary = "Get presence state",
    params(("id" = TripId, Path, description = "Trip ID")),
    responses(
        (status = 200, description = "Presence state", body = PresenceView),
        (status = 404, description = "No presence validation", body = ErrorResponse),
    )
)]
pub async fn presence(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
) -> Result<Json<PresenceView>, DispatchError> {
    let presence = state.dispatch.presence();
    let validation = presence.projection(id).await?;
    let seconds_remaining = validation.seconds_remaining(state.dispatch.now());
    let audit_log = presence.audit_log(id).await;
    Ok(Json(PresenceView {
        validation,
        seconds_remaining,
        audit_log,
    }))
}

/// `GET /trips/{id}/presence/replay` — Presence state rebuilt from the log.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] when the trip has no audit log.
#[utoipa::path(
    get,
    path = "/api/v1/trips/{id}/presence/replay",
    tag = "Trips",
    summary = "Replay presence audit log",
    description = "Folds the audit log from the start. The result always equals the live state.",
    params(("id" = TripId, Path, description = "Trip ID")),
    responses(
        (status = 200, description = "Replayed state", body = PresenceValidation),
        (status = 404, description = "No audit log", body = ErrorResponse),
    )
)]
pub async fn presence_replay(
    State(state): State<AppState>,
    Path(id): Path<TripId>,
) -> Result<Json<PresenceValidation>, DispatchError> {
    Ok(Json(state.dispatch.presence().replay(id).await?))
}

/// Trip routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/trips", get(list))
        .route("/trips/{id}", get(get_trip))
        .route("/trips/{id}/arrival", post(report_arrival))
        .route("/trips/{id}/check", post(check_position))
        .route("/trips/{id}/boarding", post(confirm_boarding))
        .route("/trips/{id}/advance", post(advance))
        .route("/trips/{id}/complete", post(complete))
        .route("/trips/{id}/cancel", post(cancel))
        .route("/trips/{id}/presence", get(presence))
        .route("/trips/{id}/presence/replay", get(presence_replay))
}
