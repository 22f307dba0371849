//! Shared fixtures for the dispatch scenario tests.

#![allow(dead_code, clippy::panic)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ride_dispatch::config::DispatchParams;
use ride_dispatch::domain::geo::offset_north;
use ride_dispatch::domain::{
    DriverId, EventBus, GeoPoint, ManualClock, PaymentMethod, Place, RideMode, RiderId,
    SeatPreference, SharedClock, VehiclePosition, VehicleState, VehicleType, Wallet, WalletId,
};
use ride_dispatch::service::{DispatchService, NewSearch, NewVehicle};

/// A dispatch core on a hand-driven clock.
pub struct Harness {
    pub service: Arc<DispatchService>,
    pub clock: Arc<ManualClock>,
}

/// Monday 2026-10-19 07:00 UTC.
pub fn monday_morning() -> DateTime<Utc> {
    let Some(at) = Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).single() else {
        panic!("valid timestamp");
    };
    at
}

pub fn harness() -> Harness {
    harness_with(DispatchParams::default())
}

pub fn harness_with(params: DispatchParams) -> Harness {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let service = Arc::new(DispatchService::new(
        params,
        EventBus::new(1024),
        Arc::clone(&clock) as SharedClock,
    ));
    Harness { service, clock }
}

/// Pickup point A.
pub fn pickup() -> GeoPoint {
    GeoPoint::new(14.6928, -17.4467)
}

/// Drop-off point B, exactly 3 km north of A.
pub fn drop_off() -> GeoPoint {
    offset_north(pickup(), 3_000.0)
}

pub fn place(point: GeoPoint, name: &str) -> Place {
    Place::new(point.lat, point.lng, name)
}

pub fn search(seat_preference: SeatPreference) -> NewSearch {
    NewSearch {
        rider_id: RiderId::new(),
        origin: place(pickup(), "A"),
        destination: place(drop_off(), "B"),
        mode: RideMode::Shared,
        seat_preference,
        payment_method: PaymentMethod::Cash,
        wallet_id: None,
    }
}

pub fn wallet_search(wallet_id: WalletId) -> NewSearch {
    NewSearch {
        payment_method: PaymentMethod::Wallet,
        wallet_id: Some(wallet_id),
        ..search(SeatPreference::Any)
    }
}

pub async fn vehicle(
    service: &DispatchService,
    meters_from_pickup: f64,
    capacity: u32,
    ride_mode: RideMode,
) -> VehicleState {
    let at = offset_north(pickup(), -meters_from_pickup);
    let Ok(vehicle) = service
        .fleet()
        .register(NewVehicle {
            driver_id: DriverId::new(),
            position: VehiclePosition {
                lat: at.lat,
                lng: at.lng,
                heading: 0.0,
            },
            capacity,
            ride_mode,
            destination: None,
            vehicle_type: VehicleType::Standard,
        })
        .await
    else {
        panic!("vehicle should register");
    };
    vehicle
}

pub async fn shared_vehicle(service: &DispatchService, meters_from_pickup: f64) -> VehicleState {
    vehicle(service, meters_from_pickup, 3, RideMode::Shared).await
}

pub async fn wallet(service: &DispatchService, balance: u64) -> Wallet {
    let Ok(wallet) = service
        .escrow()
        .create_wallet(uuid::Uuid::new_v4(), balance)
        .await
    else {
        panic!("wallet should open");
    };
    wallet
}
