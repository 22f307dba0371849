//! Scheduled trip handlers: booking, distribution, confirmation,
//! resolution.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::common_dto::{Page, PaginationParams};
use crate::api::dto::scheduling_dto::RespondScheduledOfferRequest;
use crate::app_state::AppState;
use crate::domain::{
    ScheduledOffer, ScheduledOfferId, ScheduledResolution, ScheduledTrip, ScheduledTripId, Trip,
};
use crate::error::{DispatchError, ErrorResponse};
use crate::service::NewBooking;

/// `POST /scheduled-trips` — Book a ride ahead of time.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidRequest`] for a pickup in the past and
/// [`DispatchError::InsufficientBalance`] when the deposit does not fit.
#[utoipa::path(
    post,
    path = "/api/v1/scheduled-trips",
    tag = "Scheduled",
    summary = "Book a scheduled trip",
    description = "Prices the ride and holds the security deposit in the rider's wallet.",
    request_body = NewBooking,
    responses(
        (status = 201, description = "Booking created", body = ScheduledTrip),
        (status = 400, description = "Pickup in the past", body = ErrorResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn book(
    State(state): State<AppState>,
    Json(req): Json<NewBooking>,
) -> Result<impl IntoResponse, DispatchError> {
    let booking = state.dispatch.scheduling().book(req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// `GET /scheduled-trips` — List bookings by pickup time.
#[utoipa::path(
    get,
    path = "/api/v1/scheduled-trips",
    tag = "Scheduled",
    summary = "List scheduled trips",
    params(PaginationParams),
    responses(
        (status = 200, description = "Page of bookings", body = Page<ScheduledTrip>),
    )
)]
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Json<Page<ScheduledTrip>> {
    let mut bookings = state.dispatch.scheduling().bookings().await;
    bookings.sort_by_key(|b| b.scheduled_at);
    Json(pagination.paginate(bookings))
}

/// `GET /scheduled-trips/{id}` — Get a booking.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown booking.
#[utoipa::path(
    get,
    path = "/api/v1/scheduled-trips/{id}",
    tag = "Scheduled",
    summary = "Get a scheduled trip",
    params(("id" = ScheduledTripId, Path, description = "Scheduled trip ID")),
    responses(
        (status = 200, description = "Booking", body = ScheduledTrip),
        (status = 404, description = "Booking not found", body = ErrorResponse),
    )
)]
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<ScheduledTripId>,
) -> Result<Json<ScheduledTrip>, DispatchError> {
    Ok(Json(state.dispatch.scheduling().booking(id).await?))
}

/// `POST /scheduled-trips/{id}/distribute` — Offer the booking to eligible
/// drivers.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] unless the booking is
/// pending.
#[utoipa::path(
    post,
    path = "/api/v1/scheduled-trips/{id}/distribute",
    tag = "Scheduled",
    summary = "Distribute a scheduled trip",
    description = "Sends an offer to every unblocked driver whose slot covers the pickup time and zones.",
    params(("id" = ScheduledTripId, Path, description = "Scheduled trip ID")),
    responses(
        (status = 200, description = "Offers sent", body = Vec<ScheduledOffer>),
        (status = 409, description = "Booking not pending", body = ErrorResponse),
    )
)]
pub async fn distribute(
    State(state): State<AppState>,
    Path(id): Path<ScheduledTripId>,
) -> Result<Json<Vec<ScheduledOffer>>, DispatchError> {
    Ok(Json(state.dispatch.scheduling().distribute(id).await?))
}

/// `GET /scheduled-trips/{id}/offers` — Offers sent for a booking.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown booking.
#[utoipa::path(
    get,
    path = "/api/v1/scheduled-trips/{id}/offers",
    tag = "Scheduled",
    summary = "List a booking's offers",
    params(("id" = ScheduledTripId, Path, description = "Scheduled trip ID")),
    responses(
        (status = 200, description = "Offers", body = Vec<ScheduledOffer>),
        (status = 404, description = "Booking not found", body = ErrorResponse),
    )
)]
pub async fn list_offers(
    State(state): State<AppState>,
    Path(id): Path<ScheduledTripId>,
) -> Result<Json<Vec<ScheduledOffer>>, DispatchError> {
    let scheduling = state.dispatch.scheduling();
    scheduling.booking(id).await?;
    Ok(Json(scheduling.offers_for(id).await))
}

/// `POST /scheduled-offers/{id}/respond` — Driver answers a scheduled offer.
///
/// # Errors
///
/// Returns [`DispatchError::Conflict`] when another driver already took the
/// booking.
#[utoipa::path(
    post,
    path = "/api/v1/scheduled-offers/{id}/respond",
    tag = "Scheduled",
    summary = "Respond to a scheduled offer",
    description = "The first acceptance assigns the booking and withdraws the other offers.",
    params(("id" = ScheduledOfferId, Path, description = "Scheduled offer ID")),
    request_body = RespondScheduledOfferRequest,
    responses(
        (status = 200, description = "Booking after the answer", body = ScheduledTrip),
        (status = 409, description = "Offer resolved or booking taken", body = ErrorResponse),
    )
)]
pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<ScheduledOfferId>,
    Json(req): Json<RespondScheduledOfferRequest>,
) -> Result<Json<ScheduledTrip>, DispatchError> {
    Ok(Json(state.dispatch.scheduling().respond(id, req.accept).await?))
}

/// `POST /scheduled-trips/{id}/confirm` — Turn an assigned booking into a
/// trip.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] unless the booking is
/// assigned, [`DispatchError::Conflict`] when the driver's vehicle is full.
#[utoipa::path(
    post,
    path = "/api/v1/scheduled-trips/{id}/confirm",
    tag = "Scheduled",
    summary = "Confirm a scheduled trip",
    params(("id" = ScheduledTripId, Path, description = "Scheduled trip ID")),
    responses(
        (status = 201, description = "Trip created", body = Trip),
        (status = 409, description = "Booking not assigned or vehicle full", body = ErrorResponse),
    )
)]
pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<ScheduledTripId>,
) -> Result<impl IntoResponse, DispatchError> {
    let trip = state.dispatch.scheduling().confirm(id).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// `POST /scheduled-trips/{id}/resolve` — Record how the booking ended.
///
/// # Errors
///
/// Returns [`DispatchError::AlreadyResolved`] for a settled booking and
/// [`DispatchError::InvalidTransition`] when the outcome does not fit.
#[utoipa::path(
    post,
    path = "/api/v1/scheduled-trips/{id}/resolve",
    tag = "Scheduled",
    summary = "Resolve a scheduled trip",
    description = "Settles the deposit and records the driver's punctuality.",
    params(("id" = ScheduledTripId, Path, description = "Scheduled trip ID")),
    request_body = ScheduledResolution,
    responses(
        (status = 200, description = "Booking resolved", body = ScheduledTrip),
        (status = 409, description = "Booking already resolved", body = ErrorResponse),
    )
)]
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<ScheduledTripId>,
    Json(resolution): Json<ScheduledResolution>,
) -> Result<Json<ScheduledTrip>, DispatchError> {
    Ok(Json(state.dispatch.scheduling().resolve(id, resolution).await?))
}

/// Scheduled trip routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/scheduled-trips", post(book).get(list))
        .route("/scheduled-trips/{id}", get(get_booking))
        .route("/scheduled-trips/{id}/distribute", post(distribute))
        .route("/scheduled-trips/{id}/offers", get(list_offers))
        .route("/scheduled-trips/{id}/confirm", post(confirm))
        .route("/scheduled-trips/{id}/resolve", post(resolve))
        .route("/scheduled-offers/{id}/respond", post(respond))
}
