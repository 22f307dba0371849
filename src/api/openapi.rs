//! OpenAPI document assembled from the handler annotations.

use utoipa::OpenApi;

use super::handlers::{drivers, events, offers, rides, scheduled, system, trips, vehicles, wallets};

/// OpenAPI description of every REST endpoint. Schemas are collected from
/// the handler annotations.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "ride-dispatch",
        description = "Dispatch core for shared ride-hailing: matching, offers, escrow holds, presence geofencing and driver reliability."
    ),
    paths(
        rides::search,
        rides::get_request,
        rides::list_offers,
        rides::cancel,
        rides::retry,
        rides::accept_quote,
        offers::get_offer,
        offers::accept,
        offers::decline,
        vehicles::register,
        vehicles::list,
        vehicles::get_vehicle,
        vehicles::update_position,
        vehicles::update_status,
        vehicles::report_position,
        trips::list,
        trips::get_trip,
        trips::report_arrival,
        trips::check_position,
        trips::confirm_boarding,
        trips::advance,
        trips::complete,
        trips::cancel,
        trips::presence,
        trips::presence_replay,
        wallets::create,
        wallets::get_wallet,
        wallets::top_up,
        wallets::place_hold,
        wallets::get_hold,
        wallets::release_hold,
        wallets::capture_hold,
        drivers::reliability,
        drivers::reliability_history,
        drivers::add_slot,
        drivers::list_slots,
        drivers::scheduled_offers,
        scheduled::book,
        scheduled::list,
        scheduled::get_booking,
        scheduled::distribute,
        scheduled::list_offers,
        scheduled::respond,
        scheduled::confirm,
        scheduled::resolve,
        events::for_entity,
        events::list,
        system::health_handler,
        system::dispatch_config_handler,
    ),
    tags(
        (name = "Rides", description = "Shared-ride search and private fallback"),
        (name = "Offers", description = "Driver answers to match offers"),
        (name = "Vehicles", description = "Fleet and position samples"),
        (name = "Trips", description = "Pickup, presence and trip progress"),
        (name = "Wallets", description = "Balances and escrow holds"),
        (name = "Drivers", description = "Reliability and availability"),
        (name = "Scheduled", description = "Bookings made ahead of time"),
        (name = "Events", description = "Durable event log"),
        (name = "System", description = "Health and configuration"),
    )
)]
pub struct ApiDoc;
