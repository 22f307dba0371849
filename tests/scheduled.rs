//! Scheduled bookings from slot declaration to settlement, and the
//! reliability score they feed.

#![allow(clippy::panic)]

mod common;

use chrono::{Duration, NaiveTime};
use common::{Harness, drop_off, harness, monday_morning, pickup, place, shared_vehicle, wallet};
use ride_dispatch::config::ReliabilityPolicy;
use ride_dispatch::domain::reliability::{compute_score, weighted_score};
use ride_dispatch::domain::{
    CancelledBy, DayOfWeek, DriverAvailabilitySlot, DriverId, HoldStatus, PaymentMethod, Punctuality,
    ReliabilityEvent, RiderId, ScheduledOfferStatus, ScheduledResolution, ScheduledTrip,
    ScheduledTripId, ScheduledTripStatus, TripStatus, VehicleType, WalletId,
};
use ride_dispatch::error::DispatchError;
use ride_dispatch::service::NewBooking;

fn time(h: u32) -> NaiveTime {
    let Some(t) = NaiveTime::from_hms_opt(h, 0, 0) else {
        panic!("valid time");
    };
    t
}

fn slot(driver_id: DriverId) -> DriverAvailabilitySlot {
    DriverAvailabilitySlot {
        driver_id,
        day_of_week: DayOfWeek::Monday,
        start_time: time(7),
        end_time: time(10),
        origin_zone: "plateau".to_string(),
        destination_zone: None,
        vehicle_type: VehicleType::Standard,
    }
}

async fn book(h: &Harness, wallet_id: WalletId) -> ScheduledTrip {
    let Ok(booking) = h
        .service
        .scheduling()
        .book(NewBooking {
            rider_id: RiderId::new(),
            origin: place(pickup(), "Plateau"),
            destination: place(drop_off(), "Point E"),
            origin_zone: "plateau".to_string(),
            destination_zone: "point-e".to_string(),
            scheduled_at: monday_morning() + Duration::hours(1),
            vehicle_type: VehicleType::Standard,
            wallet_id,
            payment_method: PaymentMethod::Wallet,
        })
        .await
    else {
        panic!("booking should succeed");
    };
    booking
}

/// Distributes the booking and lets `driver` take it.
async fn assign(h: &Harness, id: ScheduledTripId, driver: DriverId) -> ScheduledTrip {
    let Ok(offers) = h.service.scheduling().distribute(id).await else {
        panic!("distribution should succeed");
    };
    let Some(offer) = offers.iter().find(|o| o.driver_id == driver) else {
        panic!("driver should be offered the booking");
    };
    let Ok(booking) = h.service.scheduling().respond(offer.id, true).await else {
        panic!("acceptance should succeed");
    };
    booking
}

#[tokio::test]
async fn booked_ride_is_driven_and_settled() {
    let h = harness();
    let v = shared_vehicle(&h.service, 0.0).await;
    let other = DriverId::new();
    for driver in [v.driver_id, other] {
        let Ok(_) = h.service.scheduling().add_slot(slot(driver)).await else {
            panic!("slot should be accepted");
        };
    }
    let w = wallet(&h.service, 10_000).await;
    let booking = book(&h, w.id).await;
    assert_eq!(booking.estimated_fare, 1600);
    assert_eq!(booking.security_deposit, 320);
    assert_eq!(h.service.escrow().available_balance(w.id).await.ok(), Some(9_680));

    let matched = assign(&h, booking.id, v.driver_id).await;
    assert_eq!(matched.status, ScheduledTripStatus::Matched);
    assert_eq!(matched.driver_id, Some(v.driver_id));
    let offers = h.service.scheduling().offers_for(booking.id).await;
    assert!(offers.iter().any(|o| o.driver_id == other && o.status == ScheduledOfferStatus::Withdrawn));

    let Ok(trip) = h.service.scheduling().confirm(booking.id).await else {
        panic!("confirmation should create the trip");
    };
    assert_eq!(trip.scheduled_trip_id, Some(booking.id));
    assert!(!trip.is_shared_ride);

    // The driver shows up two minutes late.
    h.clock.set(monday_morning() + Duration::minutes(62));
    let Ok(report) = h
        .service
        .report_arrival(trip.id, Some(pickup()), Some(pickup()))
        .await
    else {
        panic!("arrival should be recorded");
    };
    assert_eq!(report.trip.status, TripStatus::Waiting);
    let Ok(_) = h.service.confirm_boarding(trip.id).await else {
        panic!("boarding should be confirmed");
    };
    let Ok(_) = h.service.advance_trip(trip.id, Some(pickup())).await else {
        panic!("trip should start");
    };
    let Ok(done) = h.service.advance_trip(trip.id, Some(drop_off())).await else {
        panic!("trip should complete");
    };
    assert_eq!(done.status, TripStatus::Completed);

    let Ok(settled) = h.service.scheduling().booking(booking.id).await else {
        panic!("booking should exist");
    };
    assert_eq!(settled.status, ScheduledTripStatus::Completed);
    let Ok(after) = h.service.escrow().wallet(w.id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(after.balance, 8_400);

    let score = h.service.reliability().score(v.driver_id).await;
    assert_eq!(score.completed_trips, 1);
    assert!((score.punctuality_score - 100.0).abs() < f64::EPSILON);
    assert!((score.acceptance_rate - 100.0).abs() < f64::EPSILON);
    let other_score = h.service.reliability().score(other).await;
    assert!(other_score.acceptance_rate.abs() < f64::EPSILON);
}

#[tokio::test]
async fn second_acceptance_loses_to_the_first() {
    let h = harness();
    let a = DriverId::new();
    let b = DriverId::new();
    for driver in [a, b] {
        let Ok(_) = h.service.scheduling().add_slot(slot(driver)).await else {
            panic!("slot should be accepted");
        };
    }
    let w = wallet(&h.service, 5_000).await;
    let booking = book(&h, w.id).await;
    let Ok(offers) = h.service.scheduling().distribute(booking.id).await else {
        panic!("distribution should succeed");
    };
    assert_eq!(offers.len(), 2);
    let (Some(first), Some(second)) = (
        offers.iter().find(|o| o.driver_id == a),
        offers.iter().find(|o| o.driver_id == b),
    ) else {
        panic!("both drivers should be offered the booking");
    };
    assert!(h.service.scheduling().respond(first.id, true).await.is_ok());
    assert!(h.service.scheduling().respond(second.id, true).await.is_err());
    let Ok(current) = h.service.scheduling().booking(booking.id).await else {
        panic!("booking should exist");
    };
    assert_eq!(current.driver_id, Some(a));
}

#[tokio::test]
async fn client_no_show_keeps_the_deposit() {
    let h = harness();
    let v = shared_vehicle(&h.service, 0.0).await;
    let Ok(_) = h.service.scheduling().add_slot(slot(v.driver_id)).await else {
        panic!("slot should be accepted");
    };
    let w = wallet(&h.service, 10_000).await;
    let booking = book(&h, w.id).await;
    assign(&h, booking.id, v.driver_id).await;
    let Ok(trip) = h.service.scheduling().confirm(booking.id).await else {
        panic!("confirmation should create the trip");
    };

    h.clock.set(monday_morning() + Duration::hours(1));
    let Ok(_) = h
        .service
        .report_arrival(trip.id, Some(pickup()), Some(pickup()))
        .await
    else {
        panic!("arrival should be recorded");
    };
    h.clock.advance_secs(120);
    h.service.fire_due_timers().await;
    let Ok(cancelled) = h.service.cancel_trip(trip.id, CancelledBy::Driver).await else {
        panic!("driver may leave after the timer");
    };
    assert_eq!(cancelled.status, TripStatus::CancelledNoPenalty);

    let Ok(settled) = h.service.scheduling().booking(booking.id).await else {
        panic!("booking should exist");
    };
    assert_eq!(settled.status, ScheduledTripStatus::NoShowClient);
    assert_eq!(settled.penalty_amount, 320);
    let Ok(after) = h.service.escrow().wallet(w.id).await else {
        panic!("wallet should exist");
    };
    assert_eq!(after.balance, 9_680);
    assert!(after.holds.iter().all(|hold| hold.status == HoldStatus::Captured));

    // Rider outcomes leave the driver's punctuality untouched.
    let score = h.service.reliability().score(v.driver_id).await;
    assert_eq!(score.total_scheduled_trips, 0);
    assert!(matches!(
        h.service
            .scheduling()
            .resolve(booking.id, ScheduledResolution::Cancelled)
            .await,
        Err(DispatchError::AlreadyResolved(_))
    ));
}

#[test]
fn reliability_blends_acceptance_and_punctuality() {
    let policy = ReliabilityPolicy::default();
    assert!((weighted_score(92.0, 78.0, &policy) - 85.0).abs() < 1e-9);

    let driver = DriverId::new();
    let at = monday_morning();
    let mut history = Vec::new();
    for i in 0..25 {
        let scheduled_trip_id = ScheduledTripId::new();
        history.push(ReliabilityEvent::OfferExtended { scheduled_trip_id, at });
        if i < 23 {
            history.push(ReliabilityEvent::OfferAccepted { scheduled_trip_id, at });
        }
    }
    for punctuality in [
        Punctuality::OnTime,
        Punctuality::OnTime,
        Punctuality::OnTime,
        Punctuality::Late { minutes: 10 },
        Punctuality::Late { minutes: 12 },
    ] {
        history.push(ReliabilityEvent::TripResolved {
            scheduled_trip_id: ScheduledTripId::new(),
            punctuality,
            at,
        });
    }
    let score = compute_score(driver, &history, &policy);
    assert!((score.acceptance_rate - 92.0).abs() < 1e-9);
    assert!((score.punctuality_score - 78.0).abs() < 1e-9);
    assert!((score.reliability_score - 85.0).abs() < 1e-9);
    assert!(!score.is_scheduling_blocked);
    assert_eq!(score.completed_trips, 5);
}

#[tokio::test]
async fn blocked_driver_is_not_offered_bookings() {
    let h = harness();
    let v = shared_vehicle(&h.service, 0.0).await;
    let reliable = DriverId::new();
    for driver in [v.driver_id, reliable] {
        let Ok(_) = h.service.scheduling().add_slot(slot(driver)).await else {
            panic!("slot should be accepted");
        };
    }
    let w = wallet(&h.service, 10_000).await;

    // Two bookings, both abandoned by the same driver.
    for _ in 0..2 {
        let booking = book(&h, w.id).await;
        assign(&h, booking.id, v.driver_id).await;
        let Ok(resolved) = h
            .service
            .scheduling()
            .resolve(booking.id, ScheduledResolution::NoShowDriver)
            .await
        else {
            panic!("no-show should resolve");
        };
        assert_eq!(resolved.status, ScheduledTripStatus::NoShowDriver);
        assert_eq!(resolved.penalty_amount, 0);
    }
    let score = h.service.reliability().score(v.driver_id).await;
    assert!(score.punctuality_score.abs() < f64::EPSILON);
    assert!(!score.is_scheduling_blocked);

    // Turning down the next one drops acceptance to two in three.
    let declined = book(&h, w.id).await;
    let Ok(offers) = h.service.scheduling().distribute(declined.id).await else {
        panic!("distribution should succeed");
    };
    let Some(offer) = offers.iter().find(|o| o.driver_id == v.driver_id) else {
        panic!("driver should still be offered bookings");
    };
    let Ok(_) = h.service.scheduling().respond(offer.id, false).await else {
        panic!("decline should be recorded");
    };
    let score = h.service.reliability().score(v.driver_id).await;
    assert!(score.reliability_score < 50.0);
    assert!(score.is_scheduling_blocked);

    let booking = book(&h, w.id).await;
    let Ok(offers) = h.service.scheduling().distribute(booking.id).await else {
        panic!("distribution should succeed");
    };
    assert_eq!(offers.len(), 1);
    assert!(offers.iter().all(|o| o.driver_id == reliable));
}
