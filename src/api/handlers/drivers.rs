//! Driver handlers: reliability, availability slots, scheduled offers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::scheduling_dto::AddSlotRequest;
use crate::app_state::AppState;
use crate::domain::{
    DriverAvailabilitySlot, DriverId, ReliabilityEvent, ReliabilityScore, ScheduledOffer,
};
use crate::error::{DispatchError, ErrorResponse};

/// `GET /drivers/{id}/reliability` — Current reliability score.
#[utoipa::path(
    get,
    path = "/api/v1/drivers/{id}/reliability",
    tag = "Drivers",
    summary = "Get driver reliability",
    description = "Acceptance rate and punctuality folded into one score. Drivers below the threshold after enough trips are blocked from scheduled work.",
    params(("id" = DriverId, Path, description = "Driver ID")),
    responses(
        (status = 200, description = "Reliability score", body = ReliabilityScore),
    )
)]
pub async fn reliability(
    State(state): State<AppState>,
    Path(id): Path<DriverId>,
) -> Json<ReliabilityScore> {
    Json(state.dispatch.reliability().score(id).await)
}

/// `GET /drivers/{id}/reliability/history` — Events behind the score.
#[utoipa::path(
    get,
    path = "/api/v1/drivers/{id}/reliability/history",
    tag = "Drivers",
    summary = "Get driver reliability history",
    params(("id" = DriverId, Path, description = "Driver ID")),
    responses(
        (status = 200, description = "History, oldest first", body = Vec<ReliabilityEvent>),
    )
)]
pub async fn reliability_history(
    State(state): State<AppState>,
    Path(id): Path<DriverId>,
) -> Json<Vec<ReliabilityEvent>> {
    Json(state.dispatch.reliability().history(id).await)
}

/// `POST /drivers/{id}/slots` — Declare a weekly availability slot.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidRequest`] when the slot ends before it
/// starts.
#[utoipa::path(
    post,
    path = "/api/v1/drivers/{id}/slots",
    tag = "Drivers",
    summary = "Add an availability slot",
    params(("id" = DriverId, Path, description = "Driver ID")),
    request_body = AddSlotRequest,
    responses(
        (status = 201, description = "Slot added", body = DriverAvailabilitySlot),
        (status = 400, description = "Invalid slot", body = ErrorResponse),
    )
)]
pub async fn add_slot(
    State(state): State<AppState>,
    Path(id): Path<DriverId>,
    Json(req): Json<AddSlotRequest>,
) -> Result<impl IntoResponse, DispatchError> {
    let slot = state.dispatch.scheduling().add_slot(req.into_slot(id)).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// `GET /drivers/{id}/slots` — A driver's availability slots.
#[utoipa::path(
    get,
    path = "/api/v1/drivers/{id}/slots",
    tag = "Drivers",
    summary = "List availability slots",
    params(("id" = DriverId, Path, description = "Driver ID")),
    responses(
        (status = 200, description = "Slots", body = Vec<DriverAvailabilitySlot>),
    )
)]
pub async fn list_slots(
    State(state): State<AppState>,
    Path(id): Path<DriverId>,
) -> Json<Vec<DriverAvailabilitySlot>> {
    Json(state.dispatch.scheduling().slots(id).await)
}

/// `GET /drivers/{id}/scheduled-offers` — Scheduled offers sent to a driver.
#[utoipa::path(
    get,
    path = "/api/v1/drivers/{id}/scheduled-offers",
    tag = "Drivers",
    summary = "List a driver's scheduled offers",
    params(("id" = DriverId, Path, description = "Driver ID")),
    responses(
        (status = 200, description = "Offers", body = Vec<ScheduledOffer>),
    )
)]
pub async fn scheduled_offers(
    State(state): State<AppState>,
    Path(id): Path<DriverId>,
) -> Json<Vec<ScheduledOffer>> {
    Json(state.dispatch.scheduling().offers_for_driver(id).await)
}

/// Driver routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/drivers/{id}/reliability", get(reliability))
        .route("/drivers/{id}/reliability/history", get(reliability_history))
        .route("/drivers/{id}/slots", get(list_slots).post(add_slot))
        .route("/drivers/{id}/scheduled-offers", get(scheduled_offers))
}
