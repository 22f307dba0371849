//! Pickup scenarios: geofence, client-wait timer, cancellation settlement
//! and the trip's ride to the drop-off.

#![allow(clippy::panic)]

mod common;

use common::{Harness, drop_off, harness, pickup, shared_vehicle, wallet, wallet_search};
use ride_dispatch::domain::geo::offset_north;
use ride_dispatch::domain::{
    AuditAction, CancelledBy, HoldStatus, PresenceState, Trip, TripStatus, WalletId,
};
use ride_dispatch::error::DispatchError;

/// A wallet-paid trip in `assigned` and the rider's wallet.
async fn assigned_trip(h: &Harness) -> (Trip, WalletId) {
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
    (accepted.trip, w.id)
}

/// Drives the trip into `waiting` with the driver 30 m from the rider.
async fn waiting_trip(h: &Harness) -> (Trip, WalletId) {
    let (trip, wallet_id) = assigned_trip(h).await;
    let Ok(report) = h
        .service
        .report_arrival(trip.id, Some(offset_north(pickup(), 30.0)), Some(pickup()))
        .await
    else {
        panic!("arrival should be recorded");
    };
    assert_eq!(report.trip.status, TripStatus::Waiting);
    (report.trip, wallet_id)
}

#[tokio::test]
async fn driver_closing_in_starts_the_client_wait_timer() {
    let h = harness();
    let (trip, _) = assigned_trip(&h).await;

    let Ok(far) = h
        .service
        .report_arrival(trip.id, Some(offset_north(pickup(), 80.0)), Some(pickup()))
        .await
    else {
        panic!("arrival should be recorded");
    };
    assert!(!far.in_zone);
    assert!((far.distance_meters - 80.0).abs() < 0.5);
    assert_eq!(far.trip.status, TripStatus::Arriving);
    assert_eq!(far.seconds_remaining, None);
    let Ok(presence) = h.service.presence().projection(trip.id).await else {
        panic!("presence should be tracked");
    };
    assert_eq!(presence.state, PresenceState::OutOfZone);

    let Ok(near) = h
        .service
        .report_arrival(trip.id, Some(offset_north(pickup(), 30.0)), Some(pickup()))
        .await
    else {
        panic!("arrival should be recorded");
    };
    assert!(near.in_zone);
    assert_eq!(near.trip.status, TripStatus::Waiting);
    assert_eq!(near.seconds_remaining, Some(120));
    assert!(near.trip.entered_at(TripStatus::Arrived).is_some());

    h.clock.advance_secs(45);
    let Ok(presence) = h.service.presence().projection(trip.id).await else {
        panic!("presence should be tracked");
    };
    assert_eq!(presence.state, PresenceState::InZone);
    assert_eq!(presence.seconds_remaining(h.service.now()), Some(75));

    let actions: Vec<AuditAction> = h
        .service
        .presence()
        .audit_log(trip.id)
        .await
        .into_iter()
        .map(|e| e.action_type)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::MovedAway,
            AuditAction::ZoneValidated,
            AuditAction::TimerStart
        ]
    );
}

#[tokio::test]
async fn missing_positions_surface_geolocation_unavailable() {
    let h = harness();
    let (trip, _) = assigned_trip(&h).await;
    assert!(matches!(
        h.service.check_position(trip.id, None, None).await,
        Err(DispatchError::GeolocationUnavailable(_))
    ));

    // Reported samples are used when the call carries none.
    let Ok(()) = h
        .service
        .report_position(*trip.rider_id.as_uuid(), pickup())
        .await
    else {
        panic!("sample should be stored");
    };
    let Ok(check) = h.service.check_position(trip.id, None, None).await else {
        panic!("check should use stored samples");
    };
    assert!(check.distance_meters > 50.0);
    assert_eq!(check.action, AuditAction::MovedAway);
}

#[tokio::test]
async fn cancelling_while_timer_runs_captures_penalty() {
    let h = harness();
    let (trip, wallet_id) = waiting_trip(&h).await;
    h.clock.advance_secs(60);

    let Ok(cancelled) = h.service.cancel_trip(trip.id, CancelledBy::Rider).await else {
        panic!("cancel should succeed");
    };
    assert_eq!(cancelled.status, TripStatus::CancelledWithPenalty);
    let Some(settlement) = cancelled.settlement else {
        panic!("cancellation should settle");
    };
    assert_eq!(settlement.captured, 500);
    assert_eq!(settlement.released, 1100);

    let Ok(w) = h.service.escrow().wallet(wallet_id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(w.balance, 9_500);
    assert_eq!(w.available_balance(), 9_500);
    assert!(w.holds.iter().all(|hold| hold.status == HoldStatus::Captured));

    let log = h.service.presence().audit_log(trip.id).await;
    assert_eq!(log.last().map(|e| e.action_type), Some(AuditAction::PenaltyWarning));
    let Ok(vehicle) = h.service.fleet().vehicle(trip.vehicle_id).await else {
        panic!("vehicle should exist");
    };
    assert_eq!(vehicle.current_passengers, 0);
}

#[tokio::test]
async fn cancelling_after_timer_expiry_releases_hold() {
    let h = harness();
    let (trip, wallet_id) = waiting_trip(&h).await;
    h.clock.advance_secs(120);
    assert!(h.service.fire_due_timers().await >= 1);

    let Ok(presence) = h.service.presence().projection(trip.id).await else {
        panic!("presence should be tracked");
    };
    assert_eq!(presence.state, PresenceState::TimerExpired);
    let Ok(replayed) = h.service.presence().replay(trip.id).await else {
        panic!("log should replay");
    };
    assert_eq!(replayed, presence);

    let Ok(cancelled) = h.service.cancel_trip(trip.id, CancelledBy::Driver).await else {
        panic!("cancel should succeed");
    };
    assert_eq!(cancelled.status, TripStatus::CancelledNoPenalty);
    let Ok(w) = h.service.escrow().wallet(wallet_id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(w.balance, 10_000);
    assert_eq!(w.available_balance(), 10_000);

    let log = h.service.presence().audit_log(trip.id).await;
    let actions: Vec<AuditAction> = log.iter().map(|e| e.action_type).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::ZoneValidated,
            AuditAction::TimerStart,
            AuditAction::TimerExpired,
            AuditAction::NoShow
        ]
    );
    assert!(log.windows(2).all(|w| matches!(w, [a, b] if a.sequence + 1 == b.sequence)));
}

#[tokio::test]
async fn boarding_and_drop_off_settle_the_fare() {
    let h = harness();
    let (trip, wallet_id) = waiting_trip(&h).await;

    let Ok(onboard) = h.service.confirm_boarding(trip.id).await else {
        panic!("boarding should be confirmed");
    };
    assert_eq!(onboard.status, TripStatus::Onboard);
    assert!(matches!(
        h.service.cancel_trip(trip.id, CancelledBy::Rider).await,
        Err(DispatchError::InvalidTransition { .. })
    ));

    // Halfway there the trip is only in progress.
    let Ok(moving) = h
        .service
        .advance_trip(trip.id, Some(offset_north(pickup(), 1_500.0)))
        .await
    else {
        panic!("progress should be recorded");
    };
    assert_eq!(moving.status, TripStatus::InProgress);

    let Ok(done) = h.service.advance_trip(trip.id, Some(drop_off())).await else {
        panic!("arrival should complete the trip");
    };
    assert_eq!(done.status, TripStatus::Completed);
    let Some(settlement) = done.settlement else {
        panic!("completion should settle");
    };
    assert_eq!(settlement.captured, 1600);
    assert_eq!(settlement.debited, 0);

    let Ok(w) = h.service.escrow().wallet(wallet_id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(w.balance, 8_400);
    let Ok(vehicle) = h.service.fleet().vehicle(trip.vehicle_id).await else {
        panic!("vehicle should exist");
    };
    assert_eq!(vehicle.current_passengers, 0);
    assert!(matches!(
        h.service.complete_trip(trip.id).await,
        Err(DispatchError::AlreadyResolved(_))
    ));
}
