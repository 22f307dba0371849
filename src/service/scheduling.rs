//! Scheduled trips: availability slots, deposits, offer distribution,
//! confirmation and resolution.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use super::escrow::EscrowManager;
use super::fleet::FleetManager;
use super::pricing;
use super::reliability::ReliabilityTracker;
use super::trips::{NewTrip, TripLifecycle};
use crate::collaborators::Notifier;
use crate::config::{FareSchedule, ReliabilityPolicy};
use crate::domain::{
    CancelledBy, DispatchEvent, DriverAvailabilitySlot, DriverId, EventBus, HoldReason,
    PaymentMethod, Place, Punctuality, Registry, ReliabilityEvent, RiderId, ScheduledOffer,
    ScheduledOfferId, ScheduledOfferStatus, ScheduledResolution, ScheduledTrip, ScheduledTripId,
    ScheduledTripStatus, SeatPreference, SharedClock, Trip, TripId, TripStatus, VehicleStatus,
    VehicleType, WalletId,
};
use crate::error::DispatchError;

/// A rider's booking request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewBooking {
    /// Rider.
    pub rider_id: RiderId,
    /// Pickup.
    pub origin: Place,
    /// Drop-off.
    pub destination: Place,
    /// Zone of the pickup.
    pub origin_zone: String,
    /// Zone of the drop-off.
    pub destination_zone: String,
    /// Pickup time.
    pub scheduled_at: DateTime<Utc>,
    /// Requested vehicle category.
    #[serde(default = "default_vehicle_type")]
    pub vehicle_type: VehicleType,
    /// Wallet the deposit is held in.
    pub wallet_id: WalletId,
    /// How the ride itself is paid.
    pub payment_method: PaymentMethod,
}

const fn default_vehicle_type() -> VehicleType {
    VehicleType::Standard
}

/// Bookings made ahead of time and the drivers who can serve them.
#[derive(Debug)]
pub struct SchedulingService {
    slots: RwLock<HashMap<DriverId, Vec<DriverAvailabilitySlot>>>,
    bookings: Registry<ScheduledTripId, ScheduledTrip>,
    offers: Registry<ScheduledOfferId, ScheduledOffer>,
    fleet: Arc<FleetManager>,
    escrow: Arc<EscrowManager>,
    trips: Arc<TripLifecycle>,
    reliability: Arc<ReliabilityTracker>,
    notifier: Arc<dyn Notifier>,
    fares: FareSchedule,
    reliability_policy: ReliabilityPolicy,
    event_bus: EventBus,
    clock: SharedClock,
}

impl SchedulingService {
    /// Creates the service.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        fleet: Arc<FleetManager>,
        escrow: Arc<EscrowManager>,
        trips: Arc<TripLifecycle>,
        reliability: Arc<ReliabilityTracker>,
        notifier: Arc<dyn Notifier>,
        fares: FareSchedule,
        reliability_policy: ReliabilityPolicy,
        event_bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            bookings: Registry::new("scheduled trip"),
            offers: Registry::new("scheduled offer"),
            fleet,
            escrow,
            trips,
            reliability,
            notifier,
            fares,
            reliability_policy,
            event_bus,
            clock,
        }
    }

    fn booking_event(&self, booking: &ScheduledTrip) -> DispatchEvent {
        DispatchEvent::ScheduledTripUpdated {
            scheduled_trip_id: booking.id,
            rider_id: booking.rider_id,
            driver_id: booking.driver_id,
            status: booking.status,
            timestamp: self.clock.now(),
        }
    }

    /// Registers a weekly availability slot.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] if the window is empty.
    pub async fn add_slot(
        &self,
        slot: DriverAvailabilitySlot,
    ) -> Result<DriverAvailabilitySlot, DispatchError> {
        if slot.start_time >= slot.end_time {
            return Err(DispatchError::InvalidRequest(format!(
                "slot ends at {} before it starts at {}",
                slot.end_time, slot.start_time
            )));
        }
        self.slots
            .write()
            .await
            .entry(slot.driver_id)
            .or_default()
            .push(slot.clone());
        tracing::info!(driver_id = %slot.driver_id, day = ?slot.day_of_week, zone = %slot.origin_zone, "availability slot added");
        Ok(slot)
    }

    /// A driver's slots.
    pub async fn slots(&self, driver_id: DriverId) -> Vec<DriverAvailabilitySlot> {
        self.slots
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Books a trip and holds its security deposit.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for a pickup time in the
    /// past and [`DispatchError::InsufficientBalance`] if the deposit does
    /// not fit.
    pub async fn book(&self, new: NewBooking) -> Result<ScheduledTrip, DispatchError> {
        let now = self.clock.now();
        if new.scheduled_at <= now {
            return Err(DispatchError::InvalidRequest(
                "scheduled time must be in the future".to_string(),
            ));
        }
        if !new.origin.point().is_valid() || !new.destination.point().is_valid() {
            return Err(DispatchError::InvalidRequest(
                "coordinate out of range".to_string(),
            ));
        }
        let distance_km = new.origin.point().distance_km(&new.destination.point());
        let estimated_fare = pricing::scheduled_estimate(&self.fares, distance_km, new.vehicle_type);
        let security_deposit =
            pricing::percent_of(estimated_fare, self.escrow.policy().scheduled_deposit_percent);
        let deposit_hold_id = if security_deposit > 0 {
            let hold = self
                .escrow
                .place_hold(new.wallet_id, security_deposit, HoldReason::ScheduledDeposit, None)
                .await?;
            Some(hold.id)
        } else {
            None
        };

        let booking = ScheduledTrip {
            id: ScheduledTripId::new(),
            rider_id: new.rider_id,
            origin: new.origin,
            destination: new.destination,
            origin_zone: new.origin_zone,
            destination_zone: new.destination_zone,
            scheduled_at: new.scheduled_at,
            vehicle_type: new.vehicle_type,
            estimated_fare,
            security_deposit,
            deposit_hold_id,
            wallet_id: new.wallet_id,
            payment_method: new.payment_method,
            status: ScheduledTripStatus::Pending,
            penalty_amount: 0,
            driver_id: None,
            trip_id: None,
            created_at: now,
        };
        self.bookings.insert(booking.id, booking.clone()).await?;

        self.event_bus.publish(self.booking_event(&booking));
        tracing::info!(
            scheduled_trip_id = %booking.id,
            rider_id = %booking.rider_id,
            estimated_fare,
            security_deposit,
            "scheduled trip booked"
        );
        Ok(booking)
    }

    /// Offers a pending booking to every eligible driver not offered yet.
    ///
    /// Eligible drivers have a covering slot and are not blocked by their
    /// reliability score.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] unless the booking is
    /// pending.
    pub async fn distribute(
        &self,
        scheduled_trip_id: ScheduledTripId,
    ) -> Result<Vec<ScheduledOffer>, DispatchError> {
        let booking = self.bookings.snapshot(scheduled_trip_id).await?;
        if booking.status != ScheduledTripStatus::Pending {
            return Err(DispatchError::invalid_transition(
                booking.status,
                ScheduledTripStatus::Pending,
            ));
        }
        let already: Vec<DriverId> = self
            .offers
            .snapshot_where(|o| o.scheduled_trip_id == scheduled_trip_id)
            .await
            .into_iter()
            .map(|o| o.driver_id)
            .collect();
        let mut eligible: Vec<DriverId> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slots)| slots.iter().any(|s| s.covers(&booking)))
            .map(|(driver, _)| *driver)
            .filter(|driver| !already.contains(driver))
            .collect();
        eligible.sort();

        let now = self.clock.now();
        let mut sent = Vec::new();
        for driver_id in eligible {
            if self.reliability.is_blocked(driver_id).await {
                tracing::debug!(%driver_id, %scheduled_trip_id, "blocked driver skipped");
                continue;
            }
            let offer = ScheduledOffer {
                id: ScheduledOfferId::new(),
                scheduled_trip_id,
                driver_id,
                status: ScheduledOfferStatus::Pending,
                created_at: now,
                resolved_at: None,
            };
            self.offers.insert(offer.id, offer.clone()).await?;
            self.reliability
                .record(
                    driver_id,
                    ReliabilityEvent::OfferExtended {
                        scheduled_trip_id,
                        at: now,
                    },
                )
                .await;
            self.notifier.notify(
                *driver_id.as_uuid(),
                "scheduled_offer",
                json!({
                    "offer_id": offer.id,
                    "scheduled_trip_id": scheduled_trip_id,
                    "scheduled_at": booking.scheduled_at,
                    "estimated_fare": booking.estimated_fare,
                }),
            );
            sent.push(offer);
        }
        tracing::info!(%scheduled_trip_id, offers = sent.len(), "scheduled trip distributed");
        Ok(sent)
    }

    /// A driver's answer to a scheduled offer. The first acceptance wins;
    /// every other pending offer for the booking is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the offer was answered
    /// or withdrawn, [`DispatchError::Conflict`] if another driver won.
    pub async fn respond(
        &self,
        offer_id: ScheduledOfferId,
        accept: bool,
    ) -> Result<ScheduledTrip, DispatchError> {
        let offer_lock = self.offers.get(offer_id).await?;
        let mut offer = offer_lock.write().await;
        if offer.status != ScheduledOfferStatus::Pending {
            return Err(DispatchError::AlreadyResolved(format!(
                "scheduled offer {offer_id} is {:?}",
                offer.status
            )));
        }
        let now = self.clock.now();
        let booking_lock = self.bookings.get(offer.scheduled_trip_id).await?;
        if !accept {
            offer.status = ScheduledOfferStatus::Declined;
            offer.resolved_at = Some(now);
            tracing::info!(%offer_id, driver_id = %offer.driver_id, "scheduled offer declined");
            return Ok(booking_lock.read().await.clone());
        }

        let mut booking = booking_lock.write().await;
        if booking.status != ScheduledTripStatus::Pending {
            offer.status = ScheduledOfferStatus::Withdrawn;
            offer.resolved_at = Some(now);
            return Err(DispatchError::Conflict(format!(
                "scheduled trip {} already {:?}",
                booking.id, booking.status
            )));
        }
        booking.status = ScheduledTripStatus::Matched;
        booking.driver_id = Some(offer.driver_id);
        offer.status = ScheduledOfferStatus::Accepted;
        offer.resolved_at = Some(now);
        let snapshot = booking.clone();
        let driver_id = offer.driver_id;
        drop(booking);
        drop(offer);

        self.withdraw_pending(snapshot.id, Some(offer_id)).await;
        self.reliability
            .record(
                driver_id,
                ReliabilityEvent::OfferAccepted {
                    scheduled_trip_id: snapshot.id,
                    at: now,
                },
            )
            .await;
        self.event_bus.publish(self.booking_event(&snapshot));
        self.notifier.notify(
            *snapshot.rider_id.as_uuid(),
            "scheduled_matched",
            json!({ "scheduled_trip_id": snapshot.id, "driver_id": driver_id }),
        );
        tracing::info!(scheduled_trip_id = %snapshot.id, %driver_id, "scheduled trip matched");
        Ok(snapshot)
    }

    async fn withdraw_pending(&self, scheduled_trip_id: ScheduledTripId, keep: Option<ScheduledOfferId>) {
        let now = self.clock.now();
        for lock in self.offers.entries().await {
            let mut offer = lock.write().await;
            if offer.scheduled_trip_id == scheduled_trip_id
                && offer.status == ScheduledOfferStatus::Pending
                && Some(offer.id) != keep
            {
                offer.status = ScheduledOfferStatus::Withdrawn;
                offer.resolved_at = Some(now);
                self.notifier.notify(
                    *offer.driver_id.as_uuid(),
                    "scheduled_offer_withdrawn",
                    json!({ "offer_id": offer.id }),
                );
            }
        }
    }

    /// Confirms a matched booking: the driver's vehicle takes the rider and
    /// a private trip carrying the deposit hold is created.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] unless the booking is
    /// matched, [`DispatchError::Conflict`] if the driver has no vehicle or
    /// no free seat.
    pub async fn confirm(&self, scheduled_trip_id: ScheduledTripId) -> Result<Trip, DispatchError> {
        let booking_lock = self.bookings.get(scheduled_trip_id).await?;
        let mut booking = booking_lock.write().await;
        if booking.status != ScheduledTripStatus::Matched {
            return Err(DispatchError::invalid_transition(
                booking.status,
                ScheduledTripStatus::Confirmed,
            ));
        }
        let Some(driver_id) = booking.driver_id else {
            return Err(DispatchError::Internal(format!(
                "matched scheduled trip {scheduled_trip_id} has no driver"
            )));
        };
        let Some(vehicle) = self.fleet.vehicle_of_driver(driver_id).await else {
            return Err(DispatchError::Conflict(format!(
                "driver {driver_id} has no registered vehicle"
            )));
        };
        let vehicle_lock = self.fleet.lock(vehicle.id).await?;
        let mut vehicle = vehicle_lock.write().await;
        let seat = vehicle.board(SeatPreference::Any)?;
        let created = self
            .trips
            .create(NewTrip {
                id: TripId::new(),
                rider_id: booking.rider_id,
                driver_id,
                vehicle_id: vehicle.id,
                origin: booking.origin.clone(),
                destination: booking.destination.clone(),
                fare: booking.estimated_fare,
                payment_method: booking.payment_method,
                wallet_id: Some(booking.wallet_id),
                escrow_hold_id: booking.deposit_hold_id,
                is_shared_ride: false,
                seat,
                offer_id: None,
                scheduled_trip_id: Some(scheduled_trip_id),
            })
            .await;
        // The deposit stays with the booking; only the seat is given back.
        let trip = match created {
            Ok(trip) => trip,
            Err(e) => {
                vehicle.release(seat);
                return Err(e);
            }
        };
        vehicle.status = VehicleStatus::Busy;
        vehicle.updated_at = self.clock.now();
        let vehicle_snapshot = vehicle.clone();
        drop(vehicle);

        booking.status = ScheduledTripStatus::Confirmed;
        booking.trip_id = Some(trip.id);
        let snapshot = booking.clone();
        drop(booking);

        self.event_bus.publish_all([
            self.fleet.updated_event(&vehicle_snapshot),
            self.booking_event(&snapshot),
        ]);
        tracing::info!(%scheduled_trip_id, trip_id = %trip.id, %driver_id, "scheduled trip confirmed");
        Ok(trip)
    }

    fn allowed(from: ScheduledTripStatus, resolution: ScheduledResolution) -> bool {
        match resolution {
            ScheduledResolution::Completed { .. } => from == ScheduledTripStatus::Confirmed,
            ScheduledResolution::Cancelled => !from.is_terminal(),
            ScheduledResolution::NoShowClient | ScheduledResolution::NoShowDriver => matches!(
                from,
                ScheduledTripStatus::Matched | ScheduledTripStatus::Confirmed
            ),
        }
    }

    /// Amount of the deposit kept for `resolution`.
    fn penalty_for(&self, booking: &ScheduledTrip, resolution: ScheduledResolution, now: DateTime<Utc>) -> u64 {
        match resolution {
            ScheduledResolution::NoShowClient => booking.security_deposit,
            ScheduledResolution::Cancelled => {
                let window = Duration::minutes(self.escrow.policy().late_cancel_window_minutes);
                if booking.scheduled_at - now < window {
                    pricing::percent_of(booking.security_deposit, 50)
                } else {
                    0
                }
            }
            ScheduledResolution::Completed { .. } | ScheduledResolution::NoShowDriver => 0,
        }
    }

    /// Settles a booking: the deposit is captured or released and the
    /// driver's reliability history gains the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] for settled bookings and
    /// [`DispatchError::InvalidTransition`] when the outcome does not fit
    /// the booking's status.
    pub async fn resolve(
        &self,
        scheduled_trip_id: ScheduledTripId,
        resolution: ScheduledResolution,
    ) -> Result<ScheduledTrip, DispatchError> {
        let booking_lock = self.bookings.get(scheduled_trip_id).await?;
        let mut booking = booking_lock.write().await;
        if booking.status.is_terminal() {
            return Err(DispatchError::AlreadyResolved(format!(
                "scheduled trip {scheduled_trip_id} is {:?}",
                booking.status
            )));
        }
        if !Self::allowed(booking.status, resolution) {
            return Err(DispatchError::invalid_transition(
                booking.status,
                resolution.status(),
            ));
        }
        let now = self.clock.now();
        if let Some(trip_id) = booking.trip_id {
            let trip = self.trips.trip(trip_id).await?;
            if !trip.status.is_terminal() {
                match resolution {
                    ScheduledResolution::Completed { .. } => {
                        return Err(DispatchError::Conflict(format!(
                            "trip {trip_id} is still {:?}",
                            trip.status
                        )));
                    }
                    ScheduledResolution::NoShowDriver => {
                        self.trips.cancel(trip_id, CancelledBy::Driver).await?;
                    }
                    ScheduledResolution::Cancelled | ScheduledResolution::NoShowClient => {
                        self.trips.cancel(trip_id, CancelledBy::Rider).await?;
                    }
                }
            }
        }

        let penalty = match booking.deposit_hold_id {
            Some(hold_id) if self.escrow.is_active(hold_id).await => {
                let penalty = self.penalty_for(&booking, resolution, now);
                if penalty > 0 {
                    self.escrow.capture_hold(hold_id, penalty).await?;
                } else {
                    self.escrow.release_hold(hold_id).await?;
                }
                penalty
            }
            _ => 0,
        };
        booking.status = resolution.status();
        booking.penalty_amount = penalty;
        let snapshot = booking.clone();
        drop(booking);

        self.withdraw_pending(scheduled_trip_id, None).await;
        if let Some(driver_id) = snapshot.driver_id {
            let punctuality = match resolution {
                ScheduledResolution::Completed { late_minutes }
                    if late_minutes > self.reliability_policy.punctuality_grace_minutes =>
                {
                    Some(Punctuality::Late {
                        minutes: late_minutes,
                    })
                }
                ScheduledResolution::Completed { .. } => Some(Punctuality::OnTime),
                ScheduledResolution::NoShowDriver => Some(Punctuality::NoShow),
                ScheduledResolution::Cancelled | ScheduledResolution::NoShowClient => None,
            };
            if let Some(punctuality) = punctuality {
                self.reliability
                    .record(
                        driver_id,
                        ReliabilityEvent::TripResolved {
                            scheduled_trip_id,
                            punctuality,
                            at: now,
                        },
                    )
                    .await;
            }
        }

        self.event_bus.publish(self.booking_event(&snapshot));
        self.notifier.notify(
            *snapshot.rider_id.as_uuid(),
            "scheduled_resolved",
            json!({ "scheduled_trip_id": scheduled_trip_id, "status": snapshot.status, "penalty": penalty }),
        );
        tracing::info!(%scheduled_trip_id, status = ?snapshot.status, penalty, "scheduled trip resolved");
        Ok(snapshot)
    }

    /// Resolves the booking behind a trip that just ended.
    ///
    /// Completion measures lateness from the driver's arrival; a driver
    /// cancelling before pickup is a driver no-show, a rider cancelling is a
    /// cancellation, and an expired client-wait timer is a client no-show.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::resolve`] errors.
    pub async fn resolve_from_trip(&self, trip: &Trip) -> Result<Option<ScheduledTrip>, DispatchError> {
        let Some(scheduled_trip_id) = trip.scheduled_trip_id else {
            return Ok(None);
        };
        let booking = self.bookings.snapshot(scheduled_trip_id).await?;
        if booking.status.is_terminal() {
            return Ok(Some(booking));
        }
        let resolution = match trip.status {
            TripStatus::Completed => {
                let arrived = trip
                    .entered_at(TripStatus::Arrived)
                    .or_else(|| trip.entered_at(TripStatus::Completed))
                    .unwrap_or(booking.scheduled_at);
                ScheduledResolution::Completed {
                    late_minutes: (arrived - booking.scheduled_at).num_minutes(),
                }
            }
            TripStatus::CancelledWithPenalty if trip.cancelled_by == Some(CancelledBy::Driver) => {
                ScheduledResolution::NoShowDriver
            }
            TripStatus::CancelledWithPenalty => ScheduledResolution::Cancelled,
            TripStatus::CancelledNoPenalty => ScheduledResolution::NoShowClient,
            _ => return Ok(None),
        };
        self.resolve(scheduled_trip_id, resolution).await.map(Some)
    }

    /// Returns a copy of a booking.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown booking.
    pub async fn booking(&self, scheduled_trip_id: ScheduledTripId) -> Result<ScheduledTrip, DispatchError> {
        self.bookings.snapshot(scheduled_trip_id).await
    }

    /// Every booking.
    pub async fn bookings(&self) -> Vec<ScheduledTrip> {
        self.bookings.snapshot_where(|_| true).await
    }

    /// Offers sent for a booking.
    pub async fn offers_for(&self, scheduled_trip_id: ScheduledTripId) -> Vec<ScheduledOffer> {
        self.offers
            .snapshot_where(|o| o.scheduled_trip_id == scheduled_trip_id)
            .await
    }

    /// Offers sent to a driver.
    pub async fn offers_for_driver(&self, driver_id: DriverId) -> Vec<ScheduledOffer> {
        self.offers
            .snapshot_where(|o| o.driver_id == driver_id)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use chrono::{NaiveTime, TimeZone};

    use super::*;
    use crate::collaborators::{BusNotifier, GeolocationSource, HaversineEtaOracle, PositionCache};
    use crate::config::{EscrowPolicy, EtaPolicy, MatchingPolicy, PresencePolicy};
    use crate::domain::geo::offset_north;
    use crate::domain::{
        Clock, DayOfWeek, GeoPoint, HoldStatus, ManualClock, RideMode, VehiclePosition,
    };
    use crate::service::fleet::NewVehicle;
    use crate::service::presence::PresenceValidator;
    use crate::service::timers::DeadlineScheduler;

    struct Harness {
        scheduling: SchedulingService,
        escrow: Arc<EscrowManager>,
        fleet: Arc<FleetManager>,
        reliability: Arc<ReliabilityTracker>,
        clock: Arc<ManualClock>,
    }

    fn monday_8am() -> DateTime<Utc> {
        // 2026-10-19 is a Monday.
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(monday_8am() - Duration::days(1)));
        let shared: SharedClock = Arc::clone(&clock) as SharedClock;
        let bus = EventBus::new(256);
        let positions = Arc::new(PositionCache::new());
        let notifier: Arc<dyn Notifier> = Arc::new(BusNotifier::new(bus.clone(), Arc::clone(&shared)));
        let fleet = Arc::new(FleetManager::new(Arc::clone(&positions), bus.clone(), Arc::clone(&shared)));
        let escrow = Arc::new(EscrowManager::new(EscrowPolicy::default(), bus.clone(), Arc::clone(&shared)));
        let timers = Arc::new(DeadlineScheduler::new());
        let presence = Arc::new(PresenceValidator::new(
            PresencePolicy::default(),
            timers,
            bus.clone(),
            Arc::clone(&shared),
        ));
        let trips = Arc::new(TripLifecycle::new(
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            presence,
            positions as Arc<dyn GeolocationSource>,
            Arc::new(HaversineEtaOracle::new(&EtaPolicy::default())),
            Arc::clone(&notifier),
            MatchingPolicy::default(),
            bus.clone(),
            Arc::clone(&shared),
        ));
        let reliability = Arc::new(ReliabilityTracker::new(
            ReliabilityPolicy::default(),
            bus.clone(),
            Arc::clone(&shared),
        ));
        let scheduling = SchedulingService::new(
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            trips,
            Arc::clone(&reliability),
            notifier,
            FareSchedule::default(),
            ReliabilityPolicy::default(),
            bus,
            shared,
        );
        Harness {
            scheduling,
            escrow,
            fleet,
            reliability,
            clock,
        }
    }

    fn slot(driver_id: DriverId) -> DriverAvailabilitySlot {
        DriverAvailabilitySlot {
            driver_id,
            day_of_week: DayOfWeek::Monday,
            start_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            origin_zone: "plateau".to_string(),
            destination_zone: None,
            vehicle_type: VehicleType::Standard,
        }
    }

    async fn booking(h: &Harness) -> ScheduledTrip {
        let rider_id = RiderId::new();
        let Ok(wallet) = h.escrow.create_wallet(*rider_id.as_uuid(), 10_000).await else {
            panic!("wallet should be created");
        };
        let pickup = GeoPoint::new(14.6928, -17.4467);
        let drop_off = offset_north(pickup, 3000.0);
        let Ok(booked) = h
            .scheduling
            .book(NewBooking {
                rider_id,
                origin: Place::new(pickup.lat, pickup.lng, "Plateau"),
                destination: Place::new(drop_off.lat, drop_off.lng, "Yoff"),
                origin_zone: "plateau".to_string(),
                destination_zone: "yoff".to_string(),
                scheduled_at: monday_8am(),
                vehicle_type: VehicleType::Standard,
                wallet_id: wallet.id,
                payment_method: PaymentMethod::Wallet,
            })
            .await
        else {
            panic!("booking should succeed");
        };
        booked
    }

    #[tokio::test]
    async fn booking_holds_twenty_percent_deposit() {
        let h = harness();
        let b = booking(&h).await;
        // 3 km: 1000 + 600 = 1600, deposit 320.
        assert_eq!(b.estimated_fare, 1600);
        assert_eq!(b.security_deposit, 320);
        let Ok(available) = h.escrow.available_balance(b.wallet_id).await else {
            panic!("wallet should exist");
        };
        assert_eq!(available, 10_000 - 320);
    }

    #[tokio::test]
    async fn first_acceptance_wins_and_blocked_drivers_are_skipped() {
        let h = harness();
        let (a, b, blocked) = (DriverId::new(), DriverId::new(), DriverId::new());
        for d in [a, b, blocked] {
            let _ = h.scheduling.add_slot(slot(d)).await;
        }
        let now = h.clock.now();
        let trip = ScheduledTripId::new();
        h.reliability
            .record(blocked, ReliabilityEvent::OfferExtended { scheduled_trip_id: trip, at: now })
            .await;
        h.reliability
            .record(
                blocked,
                ReliabilityEvent::TripResolved {
                    scheduled_trip_id: trip,
                    punctuality: Punctuality::NoShow,
                    at: now,
                },
            )
            .await;

        let booked = booking(&h).await;
        let Ok(offers) = h.scheduling.distribute(booked.id).await else {
            panic!("distribution should succeed");
        };
        assert_eq!(offers.len(), 2);
        assert!(offers.iter().all(|o| o.driver_id != blocked));

        let Ok(matched) = h.scheduling.respond(offers[1].id, true).await else {
            panic!("first acceptance should win");
        };
        assert_eq!(matched.status, ScheduledTripStatus::Matched);
        assert!(matches!(
            h.scheduling.respond(offers[0].id, true).await,
            Err(DispatchError::AlreadyResolved(_))
        ));
    }

    #[tokio::test]
    async fn late_cancellation_keeps_half_the_deposit() {
        let h = harness();
        let booked = booking(&h).await;
        h.clock.set(monday_8am() - Duration::minutes(30));
        let Ok(cancelled) = h
            .scheduling
            .resolve(booked.id, ScheduledResolution::Cancelled)
            .await
        else {
            panic!("cancellation should succeed");
        };
        assert_eq!(cancelled.penalty_amount, 160);
        let Some(hold_id) = booked.deposit_hold_id else {
            panic!("deposit should be held");
        };
        let Ok(hold) = h.escrow.hold(hold_id).await else {
            panic!("hold should exist");
        };
        assert_eq!(hold.status, HoldStatus::Captured);
        assert_eq!(hold.captured_amount, Some(160));
    }

    #[tokio::test]
    async fn driver_no_show_cancels_trip_and_releases_deposit() {
        let h = harness();
        let driver = DriverId::new();
        let _ = h.scheduling.add_slot(slot(driver)).await;
        let _ = h
            .fleet
            .register(NewVehicle {
                driver_id: driver,
                position: VehiclePosition {
                    lat: 14.6928,
                    lng: -17.4467,
                    heading: 0.0,
                },
                capacity: 3,
                ride_mode: RideMode::Private,
                destination: None,
                vehicle_type: VehicleType::Standard,
            })
            .await;
        let booked = booking(&h).await;
        let Ok(offers) = h.scheduling.distribute(booked.id).await else {
            panic!("distribution should succeed");
        };
        let Some(offer) = offers.first() else {
            panic!("driver should be offered the booking");
        };
        let _ = h.scheduling.respond(offer.id, true).await;
        let Ok(trip) = h.scheduling.confirm(booked.id).await else {
            panic!("confirmation should create a trip");
        };
        assert!(!trip.is_shared_ride);
        assert_eq!(trip.escrow_hold_id, booked.deposit_hold_id);

        assert!(matches!(
            h.scheduling
                .resolve(booked.id, ScheduledResolution::Completed { late_minutes: 0 })
                .await,
            Err(DispatchError::Conflict(_))
        ));

        let Ok(resolved) = h
            .scheduling
            .resolve(booked.id, ScheduledResolution::NoShowDriver)
            .await
        else {
            panic!("no-show should resolve");
        };
        assert_eq!(resolved.status, ScheduledTripStatus::NoShowDriver);
        assert_eq!(resolved.penalty_amount, 0);
        let Some(hold_id) = booked.deposit_hold_id else {
            panic!("deposit should be held");
        };
        let Ok(hold) = h.escrow.hold(hold_id).await else {
            panic!("hold should exist");
        };
        assert_eq!(hold.status, HoldStatus::Released);
        let score = h.reliability.score(driver).await;
        assert_eq!(score.total_scheduled_trips, 1);
        assert!(score.punctuality_score.abs() < f64::EPSILON);
        let Some(vehicle) = h.fleet.vehicle_of_driver(driver).await else {
            panic!("vehicle should exist");
        };
        assert_eq!(vehicle.current_passengers, 0);
    }
}
