//! Wallet and hold handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::common_dto::AmountRequest;
use crate::api::dto::wallet_dto::{CreateWalletRequest, PlaceHoldRequest, WalletView};
use crate::app_state::AppState;
use crate::domain::{HoldId, WalletHold, WalletId};
use crate::error::{DispatchError, ErrorResponse};

/// `POST /wallets` — Open a wallet.
///
/// # Errors
///
/// Returns [`DispatchError::Internal`] on an id collision.
#[utoipa::path(
    post,
    path = "/api/v1/wallets",
    tag = "Wallets",
    summary = "Create a wallet",
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created", body = WalletView),
    )
)]
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<impl IntoResponse, DispatchError> {
    let wallet = state
        .dispatch
        .escrow()
        .create_wallet(req.owner_id, req.initial_balance)
        .await?;
    Ok((StatusCode::CREATED, Json(WalletView::from(wallet))))
}

/// `GET /wallets/{id}` — Wallet with its holds and available balance.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown wallet.
#[utoipa::path(
    get,
    path = "/api/v1/wallets/{id}",
    tag = "Wallets",
    summary = "Get a wallet",
    params(("id" = WalletId, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Wallet", body = WalletView),
        (status = 404, description = "Wallet not found", body = ErrorResponse),
    )
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
) -> Result<Json<WalletView>, DispatchError> {
    Ok(Json(state.dispatch.escrow().wallet(id).await?.into()))
}

/// `POST /wallets/{id}/top-up` — Add funds.
///
/// # Errors
///
/// Returns [`DispatchError::InvalidRequest`] for a zero amount.
#[utoipa::path(
    post,
    path = "/api/v1/wallets/{id}/top-up",
    tag = "Wallets",
    summary = "Top up a wallet",
    params(("id" = WalletId, Path, description = "Wallet ID")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Wallet credited", body = WalletView),
        (status = 400, description = "Zero amount", body = ErrorResponse),
        (status = 404, description = "Wallet not found", body = ErrorResponse),
    )
)]
pub async fn top_up(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<WalletView>, DispatchError> {
    Ok(Json(state.dispatch.escrow().top_up(id, req.amount).await?.into()))
}

/// `POST /wallets/{id}/holds` — Reserve part of the balance.
///
/// # Errors
///
/// Returns [`DispatchError::InsufficientBalance`] when the amount exceeds
/// the available balance.
#[utoipa::path(
    post,
    path = "/api/v1/wallets/{id}/holds",
    tag = "Wallets",
    summary = "Place a hold",
    params(("id" = WalletId, Path, description = "Wallet ID")),
    request_body = PlaceHoldRequest,
    responses(
        (status = 201, description = "Hold placed", body = WalletHold),
        (status = 404, description = "Wallet not found", body = ErrorResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
    )
)]
pub async fn place_hold(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    Json(req): Json<PlaceHoldRequest>,
) -> Result<impl IntoResponse, DispatchError> {
    let hold = state
        .dispatch
        .place_hold(id, req.amount, req.reason, req.trip_id)
        .await?;
    Ok((StatusCode::CREATED, Json(hold)))
}

/// `GET /holds/{id}` — Get a hold.
///
/// # Errors
///
/// Returns [`DispatchError::NotFound`] for an unknown hold.
#[utoipa::path(
    get,
    path = "/api/v1/holds/{id}",
    tag = "Wallets",
    summary = "Get a hold",
    params(("id" = HoldId, Path, description = "Hold ID")),
    responses(
        (status = 200, description = "Hold", body = WalletHold),
        (status = 404, description = "Hold not found", body = ErrorResponse),
    )
)]
pub async fn get_hold(
    State(state): State<AppState>,
    Path(id): Path<HoldId>,
) -> Result<Json<WalletHold>, DispatchError> {
    Ok(Json(state.dispatch.escrow().hold(id).await?))
}

/// `POST /holds/{id}/release` — Return a hold to the balance.
///
/// # Errors
///
/// Returns [`DispatchError::AlreadyResolved`] for a settled hold.
#[utoipa::path(
    post,
    path = "/api/v1/holds/{id}/release",
    tag = "Wallets",
    summary = "Release a hold",
    params(("id" = HoldId, Path, description = "Hold ID")),
    responses(
        (status = 200, description = "Hold released", body = WalletHold),
        (status = 409, description = "Hold already settled", body = ErrorResponse),
    )
)]
pub async fn release_hold(
    State(state): State<AppState>,
    Path(id): Path<HoldId>,
) -> Result<Json<WalletHold>, DispatchError> {
    Ok(Json(state.dispatch.release_hold(id).await?))
}

/// `POST /holds/{id}/capture` — Debit part or all of a hold.
///
/// # Errors
///
/// Returns [`DispatchError::AlreadyResolved`] for a settled hold and
/// [`DispatchError::InvalidRequest`] when the amount exceeds the hold.
#[utoipa::path(
    post,
    path = "/api/v1/holds/{id}/capture",
    tag = "Wallets",
    summary = "Capture a hold",
    description = "Debits `amount` from the wallet and returns the rest of the hold to the balance.",
    params(("id" = HoldId, Path, description = "Hold ID")),
    request_body = AmountRequest,
    responses(
        (status = 200, description = "Hold captured", body = WalletHold),
        (status = 400, description = "Amount exceeds the hold", body = ErrorResponse),
        (status = 409, description = "Hold already settled", body = ErrorResponse),
    )
)]
pub async fn capture_hold(
    State(state): State<AppState>,
    Path(id): Path<HoldId>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<WalletHold>, DispatchError> {
    Ok(Json(state.dispatch.capture_hold(id, req.amount).await?))
}

/// Wallet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallets", post(create))
        .route("/wallets/{id}", get(get_wallet))
        .route("/wallets/{id}/top-up", post(top_up))
        .route("/wallets/{id}/holds", post(place_hold))
        .route("/holds/{id}", get(get_hold))
        .route("/holds/{id}/release", post(release_hold))
        .route("/holds/{id}/capture", post(capture_hold))
}
