//! Shared matching scenarios: fares, offer windows, races for the last
//! seat and the private fallback.

#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use common::{harness, search, shared_vehicle, vehicle, wallet, wallet_search};
use ride_dispatch::domain::{
    FallbackReason, OfferStatus, RequestStatus, RideMode, SeatAssignment, SeatPreference,
    TripStatus, VehicleStatus,
};
use ride_dispatch::error::DispatchError;

#[tokio::test]
async fn front_seat_fare_and_offer_window() {
    let h = harness();
    // Idle vehicles detour by their pickup drive: 2.6 min per km at the
    // default 30 km/h and 1.3 road factor.
    let near = shared_vehicle(&h.service, 4.0 / 2.6 * 1_000.0).await;
    let far = shared_vehicle(&h.service, 3_000.0).await;

    let Ok(outcome) = h.service.search_match(search(SeatPreference::Front)).await else {
        panic!("search should succeed");
    };
    let Some(offer) = outcome.offer else {
        panic!("an offer should be pending");
    };
    assert_eq!(offer.vehicle_id, near.id);
    assert_eq!(offer.shared_fare, 2100);
    assert_eq!(offer.original_fare, 2100);
    assert!((offer.detour_minutes - 4.0).abs() < 0.01, "detour {}", offer.detour_minutes);
    assert_eq!(offer.seat_preference, SeatPreference::Front);

    // Nothing happens one second before the window closes.
    h.clock.advance_secs(29);
    assert_eq!(h.service.fire_due_timers().await, 0);

    h.clock.advance_secs(1);
    assert_eq!(h.service.fire_due_timers().await, 1);
    let Ok(expired) = h.service.negotiator().offer(offer.id).await else {
        panic!("offer should exist");
    };
    assert_eq!(expired.status, OfferStatus::Expired);

    let Ok(after) = h.service.request(outcome.request.id).await else {
        panic!("request should exist");
    };
    assert_eq!(after.request.status, RequestStatus::Open);
    assert_eq!(after.request.rejected_offers, 1);
    let Some(next) = after.offer else {
        panic!("the request should be offered again");
    };
    assert_eq!(next.vehicle_id, far.id);
}

#[tokio::test]
async fn late_accept_is_refused_and_rescored() {
    let h = harness();
    shared_vehicle(&h.service, 300.0).await;
    let Ok(outcome) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("search should succeed");
    };
    let Some(offer) = outcome.offer else {
        panic!("an offer should be pending");
    };
    h.clock.advance_secs(31);

    assert!(matches!(
        h.service.accept_offer(offer.id).await,
        Err(DispatchError::Expired(_))
    ));
    // The only vehicle is excluded now, so the search falls back.
    let Ok(after) = h.service.request(outcome.request.id).await else {
        panic!("request should exist");
    };
    assert_eq!(after.request.status, RequestStatus::Fallback);
}

#[tokio::test]
async fn accept_boards_rider_and_creates_trip() {
    let h = harness();
    let v = shared_vehicle(&h.service, 300.0).await;
    let Ok(outcome) = h.service.search_match(search(SeatPreference::Front)).await else {
        panic!("search should succeed");
    };
    let Some(offer) = outcome.offer else {
        panic!("an offer should be pending");
    };
    let Ok(accepted) = h.service.accept_offer(offer.id).await else {
        panic!("accept should succeed");
    };
    assert_eq!(accepted.offer.status, OfferStatus::Accepted);
    assert_eq!(accepted.trip.status, TripStatus::Assigned);
    assert_eq!(accepted.trip.fare, 2100);
    assert_eq!(accepted.trip.seat, SeatAssignment::Front);
    assert!(accepted.trip.is_shared_ride);

    let Ok(vehicle) = h.service.fleet().vehicle(v.id).await else {
        panic!("vehicle should exist");
    };
    assert_eq!(vehicle.current_passengers, 1);
    assert!(vehicle.front_seat_taken);
    assert_eq!(vehicle.status, VehicleStatus::Busy);

    let Ok(request) = h.service.request(outcome.request.id).await else {
        panic!("request should exist");
    };
    assert_eq!(request.request.status, RequestStatus::Matched);
    assert!(matches!(
        h.service.accept_offer(offer.id).await,
        Err(DispatchError::AlreadyResolved(_))
    ));
}

#[tokio::test]
async fn single_seat_vehicle_carries_one_pending_offer() {
    let h = harness();
    let lone = vehicle(&h.service, 300.0, 1, RideMode::Shared).await;
    let other = shared_vehicle(&h.service, 1_200.0).await;

    let Ok(first) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("first search should succeed");
    };
    let Some(held) = first.offer else {
        panic!("the first request should hold an offer");
    };
    assert_eq!(held.vehicle_id, lone.id);

    // The closer vehicle still ranks first but its only seat is spoken for.
    let Ok(second) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("second search should succeed");
    };
    let Some(offer) = second.offer else {
        panic!("the second request should be offered another vehicle");
    };
    assert_eq!(offer.vehicle_id, other.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_for_last_seat_yield_one_trip() {
    let h = harness();
    let v = shared_vehicle(&h.service, 300.0).await;

    let Ok(first) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("first search should succeed");
    };
    let Ok(second) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("second search should succeed");
    };
    let (Some(a), Some(b)) = (first.offer, second.offer) else {
        panic!("both requests should hold an offer on the vehicle");
    };
    assert_eq!(a.vehicle_id, v.id);
    assert_eq!(b.vehicle_id, v.id);

    // A pickup made outside the core leaves a single seat for both offers.
    let Ok(_) = h.service.fleet().set_passengers(v.id, 2).await else {
        panic!("passenger count should be accepted");
    };

    let left = Arc::clone(&h.service);
    let right = Arc::clone(&h.service);
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { left.accept_offer(a.id).await }),
        tokio::spawn(async move { right.accept_offer(b.id).await }),
    );
    let (Ok(ra), Ok(rb)) = (ra, rb) else {
        panic!("accept tasks should not panic");
    };
    let wins = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::Conflict(_))))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);

    let Ok(vehicle) = h.service.fleet().vehicle(v.id).await else {
        panic!("vehicle should exist");
    };
    assert_eq!(vehicle.current_passengers, vehicle.capacity);
    assert_eq!(h.service.trips().list().await.len(), 1);
}

#[tokio::test]
async fn wallet_accept_refused_without_funds_keeps_offer() {
    let h = harness();
    shared_vehicle(&h.service, 300.0).await;
    let poor = wallet(&h.service, 500).await;
    let Ok(outcome) = h.service.search_match(wallet_search(poor.id)).await else {
        panic!("search should succeed");
    };
    let Some(offer) = outcome.offer else {
        panic!("an offer should be pending");
    };
    assert!(matches!(
        h.service.accept_offer(offer.id).await,
        Err(DispatchError::InsufficientBalance {
            requested: 1600,
            available: 500
        })
    ));
    let Ok(still) = h.service.negotiator().offer(offer.id).await else {
        panic!("offer should exist");
    };
    assert_eq!(still.status, OfferStatus::Pending);

    let Ok(_) = h.service.escrow().top_up(poor.id, 2_000).await else {
        panic!("top-up should succeed");
    };
    let Ok(accepted) = h.service.accept_offer(offer.id).await else {
        panic!("accept should succeed after top-up");
    };
    let Some(hold_id) = accepted.trip.escrow_hold_id else {
        panic!("wallet trip should carry a hold");
    };
    let Ok(hold) = h.service.escrow().hold(hold_id).await else {
        panic!("hold should exist");
    };
    assert_eq!(hold.amount, 1600);
    assert_eq!(h.service.escrow().available_balance(poor.id).await.ok(), Some(900));
}

#[tokio::test]
async fn three_declines_fall_back_with_no_match() {
    let h = harness();
    for meters in [200.0, 400.0, 600.0, 800.0] {
        shared_vehicle(&h.service, meters).await;
    }
    let Ok(mut outcome) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("search should succeed");
    };
    for _ in 0..3 {
        let Some(offer) = outcome.offer else {
            panic!("an offer should be pending");
        };
        let Ok(next) = h.service.decline_offer(offer.id).await else {
            panic!("decline should succeed");
        };
        outcome = next;
    }
    assert_eq!(outcome.request.status, RequestStatus::Fallback);
    assert!(outcome.offer.is_none());
    assert!(
        outcome
            .request
            .fallback_quote
            .is_some_and(|q| q.reason == FallbackReason::NoMatch)
    );
}

#[tokio::test]
async fn private_quote_books_nearest_private_vehicle() {
    let h = harness();
    let far = vehicle(&h.service, 2_000.0, 4, RideMode::Private).await;
    let near = vehicle(&h.service, 500.0, 4, RideMode::Private).await;
    let Ok(outcome) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("search should succeed");
    };
    assert_eq!(outcome.request.status, RequestStatus::Fallback);
    let Some(quote) = outcome.request.fallback_quote.clone() else {
        panic!("quote expected");
    };
    assert_eq!(quote.reason, FallbackReason::NoPassengers);
    assert_eq!(quote.vtc_price, 2400);

    let Ok(trip) = h.service.accept_private_quote(outcome.request.id).await else {
        panic!("quote should be booked");
    };
    assert_eq!(trip.vehicle_id, near.id);
    assert_ne!(trip.vehicle_id, far.id);
    assert!(!trip.is_shared_ride);
    assert_eq!(trip.fare, 2400);
    assert_eq!(trip.status, TripStatus::Assigned);

    let Ok(request) = h.service.request(outcome.request.id).await else {
        panic!("request should exist");
    };
    assert_eq!(request.request.status, RequestStatus::Matched);
}

#[tokio::test]
async fn quote_expires_then_retry_reopens_search() {
    let h = harness();
    let Ok(outcome) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("search should succeed");
    };
    let request_id = outcome.request.id;

    // A vehicle shows up, the rider retries the shared search.
    let v = shared_vehicle(&h.service, 300.0).await;
    let Ok(retried) = h.service.retry_shared_search(request_id).await else {
        panic!("retry should succeed");
    };
    assert_eq!(retried.request.status, RequestStatus::Open);
    assert!(retried.offer.is_some_and(|o| o.vehicle_id == v.id));

    // A second search without vehicles lets its quote lapse.
    let Ok(_) = h.service.fleet().update_status(v.id, Some(VehicleStatus::Offline), None, None).await
    else {
        panic!("vehicle should go offline");
    };
    let Ok(lonely) = h.service.search_match(search(SeatPreference::Any)).await else {
        panic!("search should succeed");
    };
    assert_eq!(lonely.request.status, RequestStatus::Fallback);
    h.clock.advance_secs(121);
    h.service.fire_due_timers().await;
    let Ok(after) = h.service.request(lonely.request.id).await else {
        panic!("request should exist");
    };
    assert_eq!(after.request.status, RequestStatus::Expired);
    assert!(matches!(
        h.service.accept_private_quote(lonely.request.id).await,
        Err(DispatchError::Expired(_))
    ));
}
