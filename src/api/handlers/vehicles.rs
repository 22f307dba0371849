//! Fleet handlers: registration, positions, availability.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};

use crate::api::dto::common_dto::{Page, PaginationParams};
use crate::api::dto::fleet_dto::{ReportPositionRequest, UpdateVehicleStatusRequest};
use crate::app_state::AppState;
use crate::domain::{GeoPoint, VehicleId, VehiclePosition, VehicleState};
use crate::error::{DispatchError, ErrorResponse};
use crate::service::NewVehicle;

/// `POST /vehicles` — Put a vehicle on the road.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidRequest`] for a bad position, capacity or
/// ride mode.
#[utoipa::path(
    post,
    path = "/api/v1/vehicles",
    tag = "Vehicles",
    summary = "Register a vehicle",
    request_body = NewVehicle,
    responses(
        (status = 201, description = "Vehicle registered", body = VehicleState),
        (status = 400, description = "Invalid vehicle", body = ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<NewVehicle>,
) -> Result<impl IntoResponse, DispatchError> {
    let vehicle = state.dispatch.fleet().register(req).await?;
    Ok((StatusCode::CREATED, Json(vehicle)))
}

/// `GET /vehicles` — List vehicles with pagination.
#[utoipa::path(
    get,
    path = "/api/v1/vehicles",
    tag = "Vehicles",
    summary = "List vehicles",
    params(PaginationParams),
    responses(
        (status = 200, description = "Page of vehicles", body = Page<VehicleState>),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Json<Page<VehicleState>> {
    let mut vehicles = state.dispatch.fleet().list().await;
    vehicles.sort_by_key(|v| v.id);
    Json(pagination.paginate(vehicles))
}

/// `GET /vehicles/{id}` — Get one vehicle.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown vehicle.
#[utoipa::path(
    get,
    path = "/api/v1/vehicles/{id}",
    tag = "Vehicles",
    summary = "Get a vehicle",
    params(("id" = VehicleId, Path, description = "Vehicle ID")),
    responses(
        (status = 200, description = "Vehicle state", body = VehicleState),
        (status = 404, description = "Vehicle not found", body = ErrorResponse),
    )
)]
pub async fn get_vehicle(
    State(state): State<AppState>,
    Path(id): Path<VehicleId>,
) -> Result<Json<VehicleState>, DispatchError> {
    Ok(Json(state.dispatch.fleet().vehicle(id).await?))
}

/// `PUT /vehicles/{id}/position` — Record a new vehicle position.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidRequest`] for out-of-range coordinates.
#[utoipa::path(
    put,
    path = "/api/v1/vehicles/{id}/position",
    tag = "Vehicles",
    summary = "Update a vehicle position",
    params(("id" = VehicleId, Path, description = "Vehicle ID")),
    request_body = VehiclePosition,
    responses(
        (status = 200, description = "Vehicle moved", body = VehicleState),
        (status = 400, description = "Invalid position", body = ErrorResponse),
        (status = 404, description = "Vehicle not found", body = ErrorResponse),
    )
)]
pub async fn update_position(
    State(state): State<AppState>,
    Path(id): Path<VehicleId>,
    Json(position): Json<VehiclePosition>,
) -> Result<Json<VehicleState>, DispatchError> {
    Ok(Json(state.dispatch.fleet().update_position(id, position).await?))
}

/// `PATCH /vehicles/{id}/status` — Change availability, mode or destination.
///
/// # Errors
///
/// Returns [`DispatchError::Conflict`] when taking an occupied vehicle
/// offline.
#[utoipa::path(
    patch,
    path = "/api/v1/vehicles/{id}/status",
    tag = "Vehicles",
    summary = "Update vehicle availability",
    params(("id" = VehicleId, Path, description = "Vehicle ID")),
    request_body = UpdateVehicleStatusRequest,
    responses(
        (status = 200, description = "Vehicle updated", body = VehicleState),
        (status = 400, description = "Invalid ride mode", body = ErrorResponse),
        (status = 409, description = "Vehicle still carries passengers", body = ErrorResponse),
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<VehicleId>,
    Json(req): Json<UpdateVehicleStatusRequest>,
) -> Result<Json<VehicleState>, DispatchError> {
    let destination = req.destination_change();
    let vehicle = state
        .dispatch
        .fleet()
        .update_status(id, req.status, req.ride_mode, destination)
        .await?;
    Ok(Json(vehicle))
}

/// `POST /positions` — Report a rider or driver position sample.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidRequest`] for out-of-range coordinates.
#[utoipa::path(
    post,
    path = "/api/v1/positions",
    tag = "Vehicles",
    summary = "Report a position sample",
    description = "Feeds the geolocation source used by presence checks when a request carries no explicit position.",
    request_body = ReportPositionRequest,
    responses(
        (status = 204, description = "Sample stored"),
        (status = 400, description = "Invalid coordinates", body = ErrorResponse),
    )
)]
pub async fn report_position(
    State(state): State<AppState>,
    Json(req): Json<ReportPositionRequest>,
) -> Result<StatusCode, DispatchError> {
    state
        .dispatch
        .report_position(req.subject_id, GeoPoint::new(req.lat, req.lng))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Fleet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vehicles", post(register).get(list))
        .route("/vehicles/{id}", get(get_vehicle))
        .route("/vehicles/{id}/position", put(update_position))
        .route("/vehicles/{id}/status", patch(update_status))
        .route("/positions", post(report_position))
}
