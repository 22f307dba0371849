//! Match offer handlers: read, accept, decline.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::{MatchOffer, OfferId};
use crate::error::{DispatchError, ErrorResponse};
use crate::service::{AcceptOutcome, SearchOutcome};

/// `GET /offers/{id}` — Get an offer.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown offer.
#[utoipa::path(
    get,
    path = "/api/v1/offers/{id}",
    tag = "Offers",
    summary = "Get a match offer",
    params(("id" = OfferId, Path, description = "Offer ID")),
    responses(
        (status = 200, description = "Offer", body = MatchOffer),
        (status = 404, description = "Offer not found", body = ErrorResponse),
    )
)]
pub async fn get_offer(
    State(state): State<AppState>,
    Path(id): Path<OfferId>,
) -> Result<Json<MatchOffer>, DispatchError> {
    Ok(Json(state.dispatch.negotiator().offer(id).await?))
}

/// `POST /offers/{id}/accept` — Driver accepts the offer.
///
/// # Errors
///
/// Returns [`DispatchError::Expired`] past the window,
/// [`DispatchError::Conflict`] if the seat is gone and
/// [`DispatchError::InsufficientBalance`] if the booking hold does not fit.
#[utoipa::path(
    post,
    path = "/api/v1/offers/{id}/accept",
    tag = "Offers",
    summary = "Accept a match offer",
    description = "Boards the rider, creates the trip in `assigned` and closes the request as `matched`. Exactly one of two accepts racing for a last seat succeeds.",
    params(("id" = OfferId, Path, description = "Offer ID")),
    responses(
        (status = 200, description = "Offer accepted", body = AcceptOutcome),
        (status = 409, description = "Seat taken or offer already resolved", body = ErrorResponse),
        (status = 410, description = "Offer expired", body = ErrorResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn accept(
    State(state): State<AppState>,
    Path(id): Path<OfferId>,
) -> Result<Json<AcceptOutcome>, DispatchError> {
    Ok(Json(state.dispatch.accept_offer(id).await?))
}

/// `POST /offers/{id}/decline` — Driver declines the offer.
///
/// # Errors
///
/// Returns [`DispatchError::AlreadyResolved`] if the offer left `pending`.
#[utoipa::path(
    post,
    path = "/api/v1/offers/{id}/decline",
    tag = "Offers",
    summary = "Decline a match offer",
    description = "Declines the offer and re-scores the request without the declining vehicle.",
    params(("id" = OfferId, Path, description = "Offer ID")),
    responses(
        (status = 200, description = "Request after re-scoring", body = SearchOutcome),
        (status = 409, description = "Offer already resolved", body = ErrorResponse),
    )
)]
pub async fn decline(
    State(state): State<AppState>,
    Path(id): Path<OfferId>,
) -> Result<Json<SearchOutcome>, DispatchError> {
    Ok(Json(state.dispatch.decline_offer(id).await?))
}

/// Match offer routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/offers/{id}", get(get_offer))
        .route("/offers/{id}/accept", post(accept))
        .route("/offers/{id}/decline", post(decline))
}
