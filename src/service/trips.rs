//! Trip Lifecycle Machine: stage transitions, pickup, settlement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use super::escrow::EscrowManager;
use super::fleet::FleetManager;
use super::presence::{PresenceCheck, PresenceValidator};
use crate::collaborators::{EtaOracle, GeolocationSource, Notifier};
use crate::config::MatchingPolicy;
use crate::domain::{
    CancellationPolicy, CancelledBy, DispatchEvent, DriverId, EventBus, GeoPoint, HoldId, OfferId,
    PaymentMethod, Place, Registry, RiderId, ScheduledTripId, SeatAssignment, Settlement,
    SharedClock, StageTimestamp, Trip, TripId, TripStatus, VehicleId, WalletId,
};
use crate::error::DispatchError;

/// Everything needed to open a trip in `assigned`.
#[derive(Debug, Clone)]
pub struct NewTrip {
    /// Pre-generated id, already referenced by the booking hold.
    pub id: TripId,
    /// Rider.
    pub rider_id: RiderId,
    /// Driver.
    pub driver_id: DriverId,
    /// Vehicle.
    pub vehicle_id: VehicleId,
    /// Pickup.
    pub origin: Place,
    /// Drop-off.
    pub destination: Place,
    /// Fare owed on completion.
    pub fare: u64,
    /// Payment method.
    pub payment_method: PaymentMethod,
    /// Wallet backing holds and the fare.
    pub wallet_id: Option<WalletId>,
    /// Booking hold.
    pub escrow_hold_id: Option<HoldId>,
    /// Shared with other riders.
    pub is_shared_ride: bool,
    /// Seat taken in the vehicle.
    pub seat: SeatAssignment,
    /// Originating offer.
    pub offer_id: Option<OfferId>,
    /// Originating scheduled booking.
    pub scheduled_trip_id: Option<ScheduledTripId>,
}

/// Result of a driver's "I've arrived" action.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ArrivalReport {
    /// Trip after the action.
    pub trip: Trip,
    /// Measured driver-rider distance.
    pub distance_meters: f64,
    /// Whether the driver was inside the pickup zone.
    pub in_zone: bool,
    /// Seconds left on the client-wait timer, once it runs.
    pub seconds_remaining: Option<u64>,
}

/// Owns every trip and drives it through its stages.
#[derive(Debug)]
pub struct TripLifecycle {
    trips: Registry<TripId, Trip>,
    fleet: Arc<FleetManager>,
    escrow: Arc<EscrowManager>,
    presence: Arc<PresenceValidator>,
    geolocation: Arc<dyn GeolocationSource>,
    eta: Arc<dyn EtaOracle>,
    notifier: Arc<dyn Notifier>,
    matching: MatchingPolicy,
    event_bus: EventBus,
    clock: SharedClock,
}

impl TripLifecycle {
    /// Creates the machine.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        fleet: Arc<FleetManager>,
        escrow: Arc<EscrowManager>,
        presence: Arc<PresenceValidator>,
        geolocation: Arc<dyn GeolocationSource>,
        eta: Arc<dyn EtaOracle>,
        notifier: Arc<dyn Notifier>,
        matching: MatchingPolicy,
        event_bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            trips: Registry::new("trip"),
            fleet,
            escrow,
            presence,
            geolocation,
            eta,
            notifier,
            matching,
            event_bus,
            clock,
        }
    }

    fn status_event(&self, trip: &Trip, from: Option<TripStatus>, at: DateTime<Utc>) -> DispatchEvent {
        DispatchEvent::TripStatusChanged {
            trip_id: trip.id,
            rider_id: trip.rider_id,
            driver_id: trip.driver_id,
            from,
            to: trip.status,
            timestamp: at,
        }
    }

    fn notify_parties(&self, trip: &Trip, kind: &str, payload: &serde_json::Value) {
        self.notifier
            .notify(*trip.rider_id.as_uuid(), kind, payload.clone());
        self.notifier
            .notify(*trip.driver_id.as_uuid(), kind, payload.clone());
    }

    /// Moves a locked trip one stage forward and collects the event.
    fn step(
        trip: &mut Trip,
        next: TripStatus,
        at: DateTime<Utc>,
        events: &mut Vec<(Option<TripStatus>, Trip)>,
    ) -> Result<(), DispatchError> {
        let from = trip.status;
        trip.transition(next, at)?;
        events.push((Some(from), trip.clone()));
        Ok(())
    }

    fn publish_steps(&self, steps: Vec<(Option<TripStatus>, Trip)>) {
        let now = self.clock.now();
        for (from, trip) in steps {
            self.event_bus.publish(self.status_event(&trip, from, now));
            self.notify_parties(
                &trip,
                "trip_status",
                &json!({ "trip_id": trip.id, "status": trip.status }),
            );
            tracing::info!(trip_id = %trip.id, ?from, to = ?trip.status, "trip transitioned");
        }
    }

    /// Opens a trip in `assigned`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] if the id is already taken.
    pub async fn create(&self, new: NewTrip) -> Result<Trip, DispatchError> {
        let now = self.clock.now();
        let trip = Trip {
            id: new.id,
            rider_id: new.rider_id,
            driver_id: new.driver_id,
            vehicle_id: new.vehicle_id,
            origin: new.origin,
            destination: new.destination,
            fare: new.fare,
            payment_method: new.payment_method,
            wallet_id: new.wallet_id,
            status: TripStatus::Assigned,
            stage_timestamps: vec![StageTimestamp {
                status: TripStatus::Assigned,
                at: now,
            }],
            escrow_hold_id: new.escrow_hold_id,
            is_shared_ride: new.is_shared_ride,
            seat: new.seat,
            offer_id: new.offer_id,
            scheduled_trip_id: new.scheduled_trip_id,
            cancelled_by: None,
            settlement: None,
        };
        self.trips.insert(trip.id, trip.clone()).await?;

        self.event_bus.publish(self.status_event(&trip, None, now));
        self.notify_parties(
            &trip,
            "trip_assigned",
            &json!({ "trip_id": trip.id, "vehicle_id": trip.vehicle_id, "fare": trip.fare }),
        );
        tracing::info!(
            trip_id = %trip.id,
            rider_id = %trip.rider_id,
            driver_id = %trip.driver_id,
            fare = trip.fare,
            shared = trip.is_shared_ride,
            "trip assigned"
        );
        Ok(trip)
    }

    /// Returns a copy of a trip.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown trip.
    pub async fn trip(&self, trip_id: TripId) -> Result<Trip, DispatchError> {
        self.trips.snapshot(trip_id).await
    }

    /// Copies of every trip.
    pub async fn list(&self) -> Vec<Trip> {
        self.trips.snapshot_where(|_| true).await
    }

    async fn positions(
        &self,
        trip: &Trip,
        driver_pos: Option<GeoPoint>,
        rider_pos: Option<GeoPoint>,
    ) -> Result<(GeoPoint, GeoPoint), DispatchError> {
        let driver = match driver_pos {
            Some(p) => p,
            None => self.geolocation.latest(*trip.driver_id.as_uuid()).await?,
        };
        let rider = match rider_pos {
            Some(p) => p,
            None => self.geolocation.latest(*trip.rider_id.as_uuid()).await?,
        };
        Ok((driver, rider))
    }

    fn ensure_pickup_stage(trip: &Trip) -> Result<(), DispatchError> {
        if trip.status.is_terminal() {
            return Err(DispatchError::AlreadyResolved(format!(
                "trip {} is {:?}",
                trip.id, trip.status
            )));
        }
        if !trip.status.is_before_onboard() {
            return Err(DispatchError::invalid_transition(trip.status, TripStatus::Arrived));
        }
        Ok(())
    }

    /// Handles the driver's "I've arrived" action.
    ///
    /// Positions default to the geolocation source. Inside the zone the trip
    /// walks to `waiting` and the client-wait timer starts; outside it only
    /// moves to `arriving`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::GeolocationUnavailable`] when a position is
    /// missing, [`DispatchError::InvalidTransition`] after pickup.
    pub async fn report_arrival(
        &self,
        trip_id: TripId,
        driver_pos: Option<GeoPoint>,
        rider_pos: Option<GeoPoint>,
    ) -> Result<ArrivalReport, DispatchError> {
        let lock = self.trips.get(trip_id).await?;
        let mut trip = lock.write().await;
        Self::ensure_pickup_stage(&trip)?;
        let (driver, rider) = self.positions(&trip, driver_pos, rider_pos).await?;
        let PresenceCheck {
            distance_meters,
            validation,
            ..
        } = self.presence.check(trip_id, driver, rider).await?;

        let now = self.clock.now();
        let mut steps = Vec::new();
        if trip.status == TripStatus::Assigned {
            Self::step(&mut trip, TripStatus::Arriving, now, &mut steps)?;
        }
        let mut seconds_remaining = validation.seconds_remaining(now);
        if validation.within_threshold {
            if trip.status == TripStatus::Arriving {
                Self::step(&mut trip, TripStatus::Arrived, now, &mut steps)?;
            }
            if trip.status == TripStatus::Arrived {
                let started = self.presence.start_timer(trip_id).await?;
                seconds_remaining = started.seconds_remaining(now);
                Self::step(&mut trip, TripStatus::Waiting, now, &mut steps)?;
            }
        }
        let snapshot = trip.clone();
        drop(trip);

        self.publish_steps(steps);
        Ok(ArrivalReport {
            trip: snapshot,
            distance_meters,
            in_zone: validation.within_threshold,
            seconds_remaining,
        })
    }

    /// Audits a position pair without moving the trip.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::GeolocationUnavailable`] when a position is
    /// missing.
    pub async fn check_position(
        &self,
        trip_id: TripId,
        driver_pos: Option<GeoPoint>,
        rider_pos: Option<GeoPoint>,
    ) -> Result<PresenceCheck, DispatchError> {
        let lock = self.trips.get(trip_id).await?;
        let trip = lock.read().await;
        Self::ensure_pickup_stage(&trip)?;
        let (driver, rider) = self.positions(&trip, driver_pos, rider_pos).await?;
        self.presence.check(trip_id, driver, rider).await
    }

    /// Moves `waiting → onboard` on the driver's explicit confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] unless the trip is
    /// waiting, [`DispatchError::Conflict`] if the driver left the zone.
    pub async fn confirm_boarding(&self, trip_id: TripId) -> Result<Trip, DispatchError> {
        let lock = self.trips.get(trip_id).await?;
        let mut trip = lock.write().await;
        if trip.status != TripStatus::Waiting {
            return Err(if trip.status.is_terminal() {
                DispatchError::AlreadyResolved(format!("trip {trip_id} is {:?}", trip.status))
            } else {
                DispatchError::invalid_transition(trip.status, TripStatus::Onboard)
            });
        }
        self.presence.confirm_boarding(trip_id).await?;
        let mut steps = Vec::new();
        Self::step(&mut trip, TripStatus::Onboard, self.clock.now(), &mut steps)?;
        let snapshot = trip.clone();
        drop(trip);

        self.publish_steps(steps);
        Ok(snapshot)
    }

    /// Fired by the presence deadline.
    pub async fn on_presence_timer(&self, trip_id: TripId) {
        let Ok(trip) = self.trips.snapshot(trip_id).await else {
            return;
        };
        if trip.status != TripStatus::Waiting {
            return;
        }
        if self.presence.expire_if_due(trip_id).await {
            self.notify_parties(&trip, "presence_timer_expired", &json!({ "trip_id": trip_id }));
            tracing::info!(%trip_id, "client-wait timer expired");
        }
    }

    /// Drives the trip from a driver position sample.
    ///
    /// `assigned` moves to `arriving`, `onboard` to `in_progress`, and the
    /// ETA to the drop-off moves the trip to `arriving_destination` and
    /// finally `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EtaUnavailable`] from the oracle and any
    /// settlement error on completion.
    pub async fn advance(
        &self,
        trip_id: TripId,
        position: Option<GeoPoint>,
    ) -> Result<Trip, DispatchError> {
        let lock = self.trips.get(trip_id).await?;
        let mut trip = lock.write().await;
        if trip.status.is_terminal() {
            return Err(DispatchError::AlreadyResolved(format!(
                "trip {trip_id} is {:?}",
                trip.status
            )));
        }
        let position = match position {
            Some(p) => p,
            None => self.fleet.position(trip.vehicle_id).await?,
        };
        let now = self.clock.now();
        let mut steps = Vec::new();

        match trip.status {
            TripStatus::Assigned => Self::step(&mut trip, TripStatus::Arriving, now, &mut steps)?,
            TripStatus::Onboard => Self::step(&mut trip, TripStatus::InProgress, now, &mut steps)?,
            _ => {}
        }
        if matches!(
            trip.status,
            TripStatus::InProgress | TripStatus::ArrivingDestination
        ) {
            let eta = self
                .eta
                .estimate_eta(position, trip.destination.point())
                .await?;
            if trip.status == TripStatus::InProgress
                && eta <= self.matching.arriving_destination_eta_minutes
            {
                Self::step(&mut trip, TripStatus::ArrivingDestination, now, &mut steps)?;
            }
            if trip.status == TripStatus::ArrivingDestination
                && eta <= self.matching.completion_eta_minutes
            {
                trip.settlement = Some(self.settle_completion(&trip).await?);
                Self::step(&mut trip, TripStatus::Completed, now, &mut steps)?;
            }
        }
        let snapshot = trip.clone();
        drop(trip);

        if snapshot.status == TripStatus::Completed {
            self.fleet.release_seat(snapshot.vehicle_id, snapshot.seat).await?;
        }
        self.publish_steps(steps);
        Ok(snapshot)
    }

    async fn settle_completion(&self, trip: &Trip) -> Result<Settlement, DispatchError> {
        match (trip.payment_method, trip.wallet_id, trip.escrow_hold_id) {
            (PaymentMethod::Wallet, Some(wallet_id), hold) => {
                // A hold resolved out of band leaves the whole fare to debit.
                let hold = match hold {
                    Some(hold_id) if self.escrow.is_active(hold_id).await => Some(hold_id),
                    Some(hold_id) => {
                        tracing::warn!(trip_id = %trip.id, %hold_id, "fare hold no longer active");
                        None
                    }
                    None => None,
                };
                self.escrow.settle_fare(wallet_id, hold, trip.fare).await
            }
            (PaymentMethod::Wallet, None, _) => Err(DispatchError::Internal(format!(
                "wallet trip {} has no wallet",
                trip.id
            ))),
            (PaymentMethod::Cash, _, Some(hold_id)) => {
                if self.escrow.is_active(hold_id).await {
                    self.escrow.settle_release(hold_id).await
                } else {
                    Ok(Settlement::default())
                }
            }
            (PaymentMethod::Cash, _, None) => Ok(Settlement::default()),
        }
    }

    /// Completes a trip arriving at its destination on the driver's action.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] from any other stage and
    /// [`DispatchError::InsufficientBalance`] if the fare cannot be covered;
    /// the trip is unchanged in both cases.
    pub async fn complete(&self, trip_id: TripId) -> Result<Trip, DispatchError> {
        let lock = self.trips.get(trip_id).await?;
        let mut trip = lock.write().await;
        if !trip.status.can_transition_to(TripStatus::Completed) {
            return Err(if trip.status.is_terminal() {
                DispatchError::AlreadyResolved(format!("trip {trip_id} is {:?}", trip.status))
            } else {
                DispatchError::invalid_transition(trip.status, TripStatus::Completed)
            });
        }
        let settlement = self.settle_completion(&trip).await?;
        trip.settlement = Some(settlement);
        let mut steps = Vec::new();
        Self::step(&mut trip, TripStatus::Completed, self.clock.now(), &mut steps)?;
        let snapshot = trip.clone();
        drop(trip);

        self.fleet.release_seat(snapshot.vehicle_id, snapshot.seat).await?;
        self.publish_steps(steps);
        tracing::info!(
            %trip_id,
            captured = settlement.captured,
            debited = settlement.debited,
            released = settlement.released,
            "trip settled"
        );
        Ok(snapshot)
    }

    /// Cancels a trip before pickup.
    ///
    /// The presence validator decides the settlement: an expired client-wait
    /// timer releases the hold, anything else captures the penalty. Holds of
    /// trips booked ahead of time are left to the booking's resolution.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] for finished trips and
    /// [`DispatchError::InvalidTransition`] once the rider is on board.
    pub async fn cancel(&self, trip_id: TripId, by: CancelledBy) -> Result<Trip, DispatchError> {
        let lock = self.trips.get(trip_id).await?;
        let mut trip = lock.write().await;
        if trip.status.is_terminal() {
            return Err(DispatchError::AlreadyResolved(format!(
                "trip {trip_id} is {:?}",
                trip.status
            )));
        }
        if !trip.status.is_before_onboard() {
            tracing::debug!(%trip_id, status = ?trip.status, "cancellation after pickup refused");
            return Err(DispatchError::invalid_transition(
                trip.status,
                TripStatus::CancelledWithPenalty,
            ));
        }

        let policy = self.presence.cancellation_policy(trip_id).await;
        let target = match policy {
            CancellationPolicy::NoPenalty => TripStatus::CancelledNoPenalty,
            CancellationPolicy::Penalty => TripStatus::CancelledWithPenalty,
        };
        let hold = match trip.escrow_hold_id {
            Some(hold_id) if trip.scheduled_trip_id.is_none() => {
                self.escrow.is_active(hold_id).await.then_some(hold_id)
            }
            _ => None,
        };
        let settlement = match (hold, policy) {
            (Some(hold_id), CancellationPolicy::Penalty) => self.escrow.settle_penalty(hold_id).await?,
            (Some(hold_id), CancellationPolicy::NoPenalty) => {
                self.escrow.settle_release(hold_id).await?
            }
            (None, _) => Settlement::default(),
        };
        self.presence.resolve_cancellation(trip_id, policy).await;
        trip.settlement = Some(settlement);
        trip.cancelled_by = Some(by);
        let mut steps = Vec::new();
        Self::step(&mut trip, target, self.clock.now(), &mut steps)?;
        let snapshot = trip.clone();
        drop(trip);

        self.fleet.release_seat(snapshot.vehicle_id, snapshot.seat).await?;
        self.publish_steps(steps);
        tracing::info!(
            %trip_id,
            ?by,
            ?policy,
            captured = settlement.captured,
            released = settlement.released,
            "trip cancelled"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::collaborators::{BusNotifier, HaversineEtaOracle, PositionCache};
    use crate::config::{EscrowPolicy, EtaPolicy, PresencePolicy};
    use crate::domain::geo::offset_north;
    use crate::domain::{
        HoldStatus, ManualClock, RideMode, SeatPreference, VehiclePosition, VehicleStatus,
        VehicleType,
    };
    use crate::service::fleet::NewVehicle;
    use crate::service::timers::DeadlineScheduler;

    struct Harness {
        trips: TripLifecycle,
        fleet: Arc<FleetManager>,
        escrow: Arc<EscrowManager>,
        positions: Arc<PositionCache>,
        clock: Arc<ManualClock>,
    }

    fn harness(policy: EscrowPolicy) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let shared: SharedClock = Arc::clone(&clock) as SharedClock;
        let bus = EventBus::new(256);
        let positions = Arc::new(PositionCache::new());
        let fleet = Arc::new(FleetManager::new(
            Arc::clone(&positions),
            bus.clone(),
            Arc::clone(&shared),
        ));
        let escrow = Arc::new(EscrowManager::new(policy, bus.clone(), Arc::clone(&shared)));
        let presence = Arc::new(PresenceValidator::new(
            PresencePolicy::default(),
            Arc::new(DeadlineScheduler::new()),
            bus.clone(),
            Arc::clone(&shared),
        ));
        let trips = TripLifecycle::new(
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            presence,
            Arc::clone(&positions) as Arc<dyn GeolocationSource>,
            Arc::new(HaversineEtaOracle::new(&EtaPolicy::default())),
            Arc::new(BusNotifier::new(bus.clone(), Arc::clone(&shared))),
            MatchingPolicy::default(),
            bus,
            shared,
        );
        Harness {
            trips,
            fleet,
            escrow,
            positions,
            clock,
        }
    }

    fn pickup() -> GeoPoint {
        GeoPoint::new(14.6928, -17.4467)
    }

    async fn booked_trip(h: &Harness, balance: u64, fare: u64) -> (Trip, HoldId) {
        let Ok(vehicle) = h
            .fleet
            .register(NewVehicle {
                driver_id: DriverId::new(),
                position: VehiclePosition {
                    lat: pickup().lat,
                    lng: pickup().lng,
                    heading: 0.0,
                },
                capacity: 3,
                ride_mode: RideMode::Shared,
                destination: None,
                vehicle_type: VehicleType::Standard,
            })
            .await
        else {
            panic!("vehicle should register");
        };
        let Ok(lock) = h.fleet.lock(vehicle.id).await else {
            panic!("vehicle should exist");
        };
        let seat = {
            let mut v = lock.write().await;
            v.status = VehicleStatus::Busy;
            v.board(SeatPreference::Any)
        };
        let Ok(seat) = seat else {
            panic!("seat should be free");
        };
        let rider_id = RiderId::new();
        let Ok(wallet) = h.escrow.create_wallet(*rider_id.as_uuid(), balance).await else {
            panic!("wallet should be created");
        };
        let trip_id = TripId::new();
        let Ok(Some(hold)) = h
            .escrow
            .hold_for_booking(PaymentMethod::Wallet, Some(wallet.id), fare, trip_id)
            .await
        else {
            panic!("booking hold should fit");
        };
        let destination = offset_north(pickup(), 3_000.0);
        let Ok(trip) = h
            .trips
            .create(NewTrip {
                id: trip_id,
                rider_id,
                driver_id: vehicle.driver_id,
                vehicle_id: vehicle.id,
                origin: Place::new(pickup().lat, pickup().lng, "A"),
                destination: Place::new(destination.lat, destination.lng, "B"),
                fare,
                payment_method: PaymentMethod::Wallet,
                wallet_id: Some(wallet.id),
                escrow_hold_id: Some(hold.id),
                is_shared_ride: true,
                seat,
                offer_id: None,
                scheduled_trip_id: None,
            })
            .await
        else {
            panic!("trip should be created");
        };
        (trip, hold.id)
    }

    #[tokio::test]
    async fn arrival_out_of_zone_then_in_zone() {
        let h = harness(EscrowPolicy::default());
        let (trip, _) = booked_trip(&h, 5000, 2100).await;
        let Ok(far) = h
            .trips
            .report_arrival(trip.id, Some(offset_north(pickup(), 80.0)), Some(pickup()))
            .await
        else {
            panic!("arrival should be processed");
        };
        assert!(!far.in_zone);
        assert_eq!(far.trip.status, TripStatus::Arriving);

        let Ok(near) = h
            .trips
            .report_arrival(trip.id, Some(offset_north(pickup(), 30.0)), Some(pickup()))
            .await
        else {
            panic!("arrival should be processed");
        };
        assert!(near.in_zone);
        assert_eq!(near.trip.status, TripStatus::Waiting);
        assert_eq!(near.seconds_remaining, Some(120));
    }

    #[tokio::test]
    async fn arrival_without_samples_is_geolocation_error() {
        let h = harness(EscrowPolicy::default());
        let (trip, _) = booked_trip(&h, 5000, 2100).await;
        let result = h.trips.report_arrival(trip.id, None, None).await;
        assert!(matches!(result, Err(DispatchError::GeolocationUnavailable(_))));

        let _ = h.positions.report(*trip.rider_id.as_uuid(), pickup()).await;
        let Ok(report) = h.trips.report_arrival(trip.id, None, None).await else {
            panic!("samples are now available");
        };
        assert!(report.in_zone);
    }

    #[tokio::test]
    async fn penalty_while_waiting_and_release_after_expiry() {
        let h = harness(EscrowPolicy::default());
        let (trip, hold) = booked_trip(&h, 5000, 1600).await;
        let _ = h.trips.report_arrival(trip.id, Some(pickup()), Some(pickup())).await;
        h.clock.advance_secs(30);
        let Ok(cancelled) = h.trips.cancel(trip.id, CancelledBy::Rider).await else {
            panic!("cancel should succeed");
        };
        assert_eq!(cancelled.status, TripStatus::CancelledWithPenalty);
        assert_eq!(
            cancelled.settlement,
            Some(Settlement {
                captured: 500,
                debited: 0,
                released: 1100
            })
        );
        let Ok(h_after) = h.escrow.hold(hold).await else {
            panic!("hold should exist");
        };
        assert_eq!(h_after.status, HoldStatus::Captured);

        let h2 = harness(EscrowPolicy::default());
        let (trip2, hold2) = booked_trip(&h2, 5000, 1600).await;
        let _ = h2.trips.report_arrival(trip2.id, Some(pickup()), Some(pickup())).await;
        h2.clock.advance_secs(121);
        h2.trips.on_presence_timer(trip2.id).await;
        let Ok(cancelled2) = h2.trips.cancel(trip2.id, CancelledBy::Driver).await else {
            panic!("cancel should succeed");
        };
        assert_eq!(cancelled2.status, TripStatus::CancelledNoPenalty);
        assert!(!h2.escrow.is_active(hold2).await);
        let Ok(v) = h2.fleet.vehicle(trip2.vehicle_id).await else {
            panic!("vehicle should exist");
        };
        assert_eq!(v.current_passengers, 0);
    }

    #[tokio::test]
    async fn full_ride_settles_wallet_fare() {
        let h = harness(EscrowPolicy::default());
        let (trip, _) = booked_trip(&h, 5000, 2100).await;
        let _ = h.trips.report_arrival(trip.id, Some(pickup()), Some(pickup())).await;
        let Ok(onboard) = h.trips.confirm_boarding(trip.id).await else {
            panic!("boarding should be confirmed in zone");
        };
        assert_eq!(onboard.status, TripStatus::Onboard);
        assert!(matches!(
            h.trips.cancel(trip.id, CancelledBy::Rider).await,
            Err(DispatchError::InvalidTransition { .. })
        ));

        let halfway = offset_north(pickup(), 1_500.0);
        let Ok(moving) = h.trips.advance(trip.id, Some(halfway)).await else {
            panic!("advance should succeed");
        };
        assert_eq!(moving.status, TripStatus::InProgress);

        let Ok(done) = h.trips.advance(trip.id, Some(trip.destination.point())).await else {
            panic!("advance should succeed");
        };
        assert_eq!(done.status, TripStatus::Completed);
        assert_eq!(
            done.settlement,
            Some(Settlement {
                captured: 2100,
                debited: 0,
                released: 0
            })
        );
        let Some(wallet_id) = trip.wallet_id else {
            panic!("wallet trip should carry its wallet");
        };
        let Ok(wallet) = h.escrow.wallet(wallet_id).await else {
            panic!("wallet should exist");
        };
        assert_eq!(wallet.balance, 2900);
    }
}
