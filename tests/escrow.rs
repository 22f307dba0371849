//! Escrow invariants through the dispatch facade.

#![allow(clippy::panic)]

mod common;

use common::{drop_off, harness, pickup, shared_vehicle, wallet, wallet_search};
use ride_dispatch::domain::geo::offset_north;
use ride_dispatch::domain::{HoldReason, HoldStatus, TripStatus};
use ride_dispatch::error::DispatchError;

#[tokio::test]
async fn holds_never_exceed_the_balance() {
    let h = harness();
    let w = wallet(&h.service, 1_000).await;

    let Ok(first) = h
        .service
        .place_hold(w.id, 700, HoldReason::FareGuarantee, None)
        .await
    else {
        panic!("first hold should fit");
    };
    assert!(matches!(
        h.service
            .place_hold(w.id, 400, HoldReason::SeatReservation, None)
            .await,
        Err(DispatchError::InsufficientBalance {
            requested: 400,
            available: 300
        })
    ));
    assert_eq!(h.service.escrow().available_balance(w.id).await.ok(), Some(300));

    let Ok(released) = h.service.release_hold(first.id).await else {
        panic!("release should succeed");
    };
    assert_eq!(released.status, HoldStatus::Released);
    assert_eq!(h.service.escrow().available_balance(w.id).await.ok(), Some(1_000));
}

#[tokio::test]
async fn settled_holds_cannot_be_settled_twice() {
    let h = harness();
    let w = wallet(&h.service, 2_000).await;
    let Ok(hold) = h
        .service
        .place_hold(w.id, 800, HoldReason::FareGuarantee, None)
        .await
    else {
        panic!("hold should fit");
    };

    assert!(matches!(
        h.service.capture_hold(hold.id, 900).await,
        Err(DispatchError::InvalidRequest(_))
    ));
    let Ok(captured) = h.service.capture_hold(hold.id, 500).await else {
        panic!("capture should succeed");
    };
    assert_eq!(captured.status, HoldStatus::Captured);
    assert_eq!(captured.captured_amount, Some(500));

    assert!(matches!(
        h.service.release_hold(hold.id).await,
        Err(DispatchError::AlreadyResolved(_))
    ));
    assert!(matches!(
        h.service.capture_hold(hold.id, 100).await,
        Err(DispatchError::AlreadyResolved(_))
    ));

    let Ok(after) = h.service.escrow().wallet(w.id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(after.balance, 1_500);
    assert_eq!(after.available_balance(), 1_500);
}

#[tokio::test]
async fn top_up_restores_spending_power() {
    let h = harness();
    let w = wallet(&h.service, 0).await;
    assert!(matches!(
        h.service.escrow().top_up(w.id, 0).await,
        Err(DispatchError::InvalidRequest(_))
    ));
    let Ok(topped) = h.service.escrow().top_up(w.id, 1_200).await else {
        panic!("top-up should succeed");
    };
    assert_eq!(topped.balance, 1_200);
    assert!(
        h.service
            .place_hold(w.id, 1_200, HoldReason::ScheduledDeposit, None)
            .await
            .is_ok()
    );
    assert_eq!(h.service.escrow().available_balance(w.id).await.ok(), Some(0));
}

#[tokio::test]
async fn trip_completes_after_its_fare_hold_was_released() {
    let h = harness();
    shared_vehicle(&h.service, 300.0).await;
    let w = wallet(&h.service, 10_000).await;
    let Ok(outcome) = h.service.search_match(wallet_search(w.id)).await else {
        panic!("search should succeed");
    };
    let Some(offer) = outcome.offer else {
        panic!("an offer should be pending");
    };
    let Ok(accepted) = h.service.accept_offer(offer.id).await else {
        panic!("accept should succeed");
    };
    let trip = accepted.trip;
    let Some(hold_id) = trip.escrow_hold_id else {
        panic!("wallet trips hold the fare");
    };
    let Ok(released) = h.service.release_hold(hold_id).await else {
        panic!("release should succeed");
    };
    assert_eq!(released.status, HoldStatus::Released);

    let Ok(_) = h
        .service
        .report_arrival(trip.id, Some(offset_north(pickup(), 30.0)), Some(pickup()))
        .await
    else {
        panic!("arrival should be recorded");
    };
    let Ok(_) = h.service.confirm_boarding(trip.id).await else {
        panic!("boarding should be confirmed");
    };
    let Ok(done) = h.service.advance_trip(trip.id, Some(drop_off())).await else {
        panic!("the trip should still complete");
    };
    assert_eq!(done.status, TripStatus::Completed);
    let Some(settlement) = done.settlement else {
        panic!("completion should settle");
    };
    assert_eq!((settlement.captured, settlement.debited), (0, 1_600));

    let Ok(after) = h.service.escrow().wallet(w.id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(after.balance, 8_400);
    let Ok(vehicle) = h.service.fleet().vehicle(trip.vehicle_id).await else {
        panic!("vehicle should exist");
    };
    assert_eq!(vehicle.current_passengers, 0);
}
