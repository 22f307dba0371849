//! Ride search handlers: search, read, cancel, retry, private quote.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::{MatchOffer, RequestId, RideRequest, Trip};
use crate::error::{DispatchError, ErrorResponse};
use crate::service::{NewSearch, SearchOutcome};

/// `POST /rides/search` — Open a shared-ride search.
///
/// # Errors
///
/// Returns [`DispatchError`] on invalid input or an unknown wallet.
#[utoipa::path(
    post,
    path = "/api/v1/rides/search",
    tag = "Rides",
    summary = "Search a shared ride",
    description = "Opens a shared search, scores compatible vehicles and extends an offer to the best one. When nothing fits the request falls back to a private quote.",
    request_body = NewSearch,
    responses(
        (status = 201, description = "Search opened", body = SearchOutcome),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Wallet not found", body = ErrorResponse),
    )
)]
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<NewSearch>,
) -> Result<impl IntoResponse, DispatchError> {
    let outcome = state.dispatch.search_match(req).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `GET /rides/{id}` — Request and its pending offer.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown request.
#[utoipa::path(
    get,
    path = "/api/v1/rides/{id}",
    tag = "Rides",
    summary = "Get a ride request",
    params(("id" = RequestId, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request state", body = SearchOutcome),
        (status = 404, description = "Request not found", body = ErrorResponse),
    )
)]
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<SearchOutcome>, DispatchError> {
    Ok(Json(state.dispatch.request(id).await?))
}

/// `GET /rides/{id}/offers` — Every offer made for the request.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown request.
#[utoipa::path(
    get,
    path = "/api/v1/rides/{id}/offers",
    tag = "Rides",
    summary = "List a request's offers",
    params(("id" = RequestId, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Offers, oldest first", body = Vec<MatchOffer>),
        (status = 404, description = "Request not found", body = ErrorResponse),
    )
)]
pub async fn list_offers(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<Vec<MatchOffer>>, DispatchError> {
    state.dispatch.request(id).await?;
    Ok(Json(state.dispatch.negotiator().offers_for_request(id).await))
}

/// `POST /rides/{id}/cancel` — Abort a search or a quote.
///
/// # Errors
///
/// Returns [`DispatchError::AlreadyResolved`] once the request closed.
#[utoipa::path(
    post,
    path = "/api/v1/rides/{id}/cancel",
    tag = "Rides",
    summary = "Cancel a ride request",
    params(("id" = RequestId, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request cancelled", body = RideRequest),
        (status = 404, description = "Request not found", body = ErrorResponse),
        (status = 409, description = "Request already closed", body = ErrorResponse),
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<RideRequest>, DispatchError> {
    Ok(Json(state.dispatch.cancel_request(id).await?))
}

/// `POST /rides/{id}/retry` — Restart the shared search after a fallback.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidTransition`] unless the request is in
/// fallback.
#[utoipa::path(
    post,
    path = "/api/v1/rides/{id}/retry",
    tag = "Rides",
    summary = "Retry the shared search",
    params(("id" = RequestId, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Search restarted", body = SearchOutcome),
        (status = 409, description = "Request is not in fallback", body = ErrorResponse),
    )
)]
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<SearchOutcome>, DispatchError> {
    Ok(Json(state.dispatch.retry_shared_search(id).await?))
}

/// `POST /rides/{id}/accept-quote` — Book the private quote.
///
/// # Errors
///
/// Returns [`DispatchError`] when the quote expired, no private vehicle is
/// free or the wallet cannot cover the hold.
#[utoipa::path(
    post,
    path = "/api/v1/rides/{id}/accept-quote",
    tag = "Rides",
    summary = "Accept the private quote",
    params(("id" = RequestId, Path, description = "Request ID")),
    responses(
        (status = 201, description = "Private trip created", body = Trip),
        (status = 409, description = "No private vehicle available", body = ErrorResponse),
        (status = 410, description = "Quote expired", body = ErrorResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn accept_quote(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<impl IntoResponse, DispatchError> {
    let trip = state.dispatch.accept_private_quote(id).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// Ride request routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rides/search", post(search))
        .route("/rides/{id}", get(get_request))
        .route("/rides/{id}/offers", get(list_offers))
        .route("/rides/{id}/cancel", post(cancel))
        .route("/rides/{id}/retry", post(retry))
        .route("/rides/{id}/accept-quote", post(accept_quote))
}
