//! REST endpoint handlers organized by resource.

pub mod drivers;
pub mod events;
pub mod offers;
pub mod rides;
pub mod scheduled;
pub mod system;
pub mod trips;
pub mod vehicles;
pub mod wallets;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(rides::routes())
        .merge(offers::routes())
        .merge(vehicles::routes())
        .merge(trips::routes())
        .merge(wallets::routes())
        .merge(drivers::routes())
        .merge(scheduled::routes())
        .merge(events::routes())
}
