//! Match Negotiator: one offer at a time per request, a fixed answer window,
//! and an accept path that can never oversell a seat.
//!
//! Lock order: offer → request → vehicle → wallet. The offer book is a leaf
//! mutex; it is taken last and released before any other lock is acquired.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use utoipa::ToSchema;

use super::escrow::EscrowManager;
use super::fleet::FleetManager;
use super::scorer::Candidate;
use super::timers::{DeadlineScheduler, TimerKey};
use super::trips::{NewTrip, TripLifecycle};
use crate::collaborators::Notifier;
use crate::config::MatchingPolicy;
use crate::domain::{
    DispatchEvent, EventBus, MatchOffer, OfferId, OfferStatus, Registry, RequestId, RequestStatus,
    RideRequest, SeatPreference, SharedClock, Trip, TripId, VehicleId, VehicleStatus,
};
use crate::error::DispatchError;

/// Shared registry of ride requests.
pub type RequestRegistry = Registry<RequestId, RideRequest>;

/// Result of a successful accept.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AcceptOutcome {
    /// The accepted offer.
    pub offer: MatchOffer,
    /// The trip it created.
    pub trip: Trip,
}

/// Pending offers indexed by request and by vehicle.
#[derive(Debug, Default)]
struct OfferBook {
    by_request: HashMap<RequestId, OfferId>,
    by_vehicle: HashMap<VehicleId, Vec<(OfferId, SeatPreference)>>,
}

impl OfferBook {
    fn reserved_on(&self, vehicle_id: VehicleId) -> Vec<SeatPreference> {
        self.by_vehicle
            .get(&vehicle_id)
            .map(|v| v.iter().map(|(_, pref)| *pref).collect())
            .unwrap_or_default()
    }

    fn insert(&mut self, offer: &MatchOffer) {
        self.by_request.insert(offer.request_id, offer.id);
        self.by_vehicle
            .entry(offer.vehicle_id)
            .or_default()
            .push((offer.id, offer.seat_preference));
    }

    fn remove(&mut self, offer: &MatchOffer) {
        if self.by_request.get(&offer.request_id) == Some(&offer.id) {
            self.by_request.remove(&offer.request_id);
        }
        if let Some(list) = self.by_vehicle.get_mut(&offer.vehicle_id) {
            list.retain(|(id, _)| *id != offer.id);
            if list.is_empty() {
                self.by_vehicle.remove(&offer.vehicle_id);
            }
        }
    }
}

/// Owns match offers and their countdowns.
#[derive(Debug)]
pub struct MatchNegotiator {
    requests: Arc<RequestRegistry>,
    offers: Registry<OfferId, MatchOffer>,
    book: Mutex<OfferBook>,
    fleet: Arc<FleetManager>,
    escrow: Arc<EscrowManager>,
    trips: Arc<TripLifecycle>,
    notifier: Arc<dyn Notifier>,
    timers: Arc<DeadlineScheduler>,
    matching: MatchingPolicy,
    event_bus: EventBus,
    clock: SharedClock,
}

impl MatchNegotiator {
    /// Creates a negotiator.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        requests: Arc<RequestRegistry>,
        fleet: Arc<FleetManager>,
        escrow: Arc<EscrowManager>,
        trips: Arc<TripLifecycle>,
        notifier: Arc<dyn Notifier>,
        timers: Arc<DeadlineScheduler>,
        matching: MatchingPolicy,
        event_bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            requests,
            offers: Registry::new("offer"),
            book: Mutex::new(OfferBook::default()),
            fleet,
            escrow,
            trips,
            notifier,
            timers,
            matching,
            event_bus,
            clock,
        }
    }

    fn resolved_event(offer: &MatchOffer, at: DateTime<Utc>) -> DispatchEvent {
        DispatchEvent::OfferResolved {
            offer_id: offer.id,
            request_id: offer.request_id,
            vehicle_id: offer.vehicle_id,
            status: offer.status,
            timestamp: at,
        }
    }

    /// Extends an offer for `candidate` to the driver.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Conflict`] if the request is not open, already
    /// has a pending offer, or the vehicle no longer has the seat once
    /// accepted and pending work is accounted for.
    pub async fn propose(
        &self,
        request_id: RequestId,
        candidate: &Candidate,
    ) -> Result<MatchOffer, DispatchError> {
        let request_lock = self.requests.get(request_id).await?;
        let request = request_lock.read().await;
        if !request.is_open() {
            return Err(DispatchError::Conflict(format!(
                "request {request_id} is {:?}",
                request.status
            )));
        }
        let vehicle_lock = self.fleet.lock(candidate.vehicle_id).await?;
        let vehicle = vehicle_lock.write().await;

        let now = self.clock.now();
        let window = Duration::seconds(i64::try_from(self.matching.offer_window_secs).unwrap_or(30));
        let offer = MatchOffer {
            id: OfferId::new(),
            request_id,
            rider_id: request.rider_id,
            vehicle_id: vehicle.id,
            driver_id: vehicle.driver_id,
            seat_preference: request.seat_preference,
            detour_minutes: candidate.detour_minutes,
            pickup_eta_minutes: candidate.pickup_eta_minutes,
            shared_fare: candidate.shared_fare,
            original_fare: candidate.original_fare,
            created_at: now,
            expires_at: now + window,
            status: OfferStatus::Pending,
            resolved_at: None,
        };
        {
            let mut book = self.book.lock().await;
            if let Some(pending) = book.by_request.get(&request_id) {
                return Err(DispatchError::Conflict(format!(
                    "request {request_id} already has pending offer {pending}"
                )));
            }
            let fits = vehicle
                .with_reserved(&book.reserved_on(vehicle.id))
                .and_then(|v| v.seat_for(request.seat_preference))
                .is_some();
            if !fits || !vehicle.is_shared_candidate() {
                tracing::debug!(%request_id, vehicle_id = %vehicle.id, "seat taken since scoring");
                return Err(DispatchError::Conflict(format!(
                    "vehicle {} has no free {:?} seat",
                    vehicle.id, request.seat_preference
                )));
            }
            book.insert(&offer);
        }
        drop(vehicle);
        drop(request);

        self.offers.insert(offer.id, offer.clone()).await?;
        self.timers
            .schedule(TimerKey::OfferExpiry(offer.id), offer.expires_at)
            .await;

        self.event_bus.publish(DispatchEvent::OfferProposed {
            offer_id: offer.id,
            request_id,
            vehicle_id: offer.vehicle_id,
            driver_id: offer.driver_id,
            detour_minutes: offer.detour_minutes,
            shared_fare: offer.shared_fare,
            expires_at: offer.expires_at,
            timestamp: now,
        });
        self.notifier.notify(
            *offer.driver_id.as_uuid(),
            "match_offer",
            json!({
                "offer_id": offer.id,
                "request_id": request_id,
                "shared_fare": offer.shared_fare,
                "detour_minutes": offer.detour_minutes,
                "seconds_remaining": offer.seconds_remaining(now),
            }),
        );
        tracing::info!(
            offer_id = %offer.id,
            %request_id,
            vehicle_id = %offer.vehicle_id,
            detour = offer.detour_minutes,
            fare = offer.shared_fare,
            "offer proposed"
        );
        Ok(offer)
    }

    /// Resolves a pending offer under its lock and frees its reservation.
    async fn close(&self, offer: &mut MatchOffer, status: OfferStatus, at: DateTime<Utc>) {
        offer.resolve(status, at);
        self.book.lock().await.remove(offer);
        self.timers.cancel(TimerKey::OfferExpiry(offer.id)).await;
    }

    /// Counts a failed offer against its request, if the search still runs.
    async fn reject_on_request(&self, offer: &MatchOffer) -> Result<(), DispatchError> {
        let request_lock = self.requests.get(offer.request_id).await?;
        let mut request = request_lock.write().await;
        if request.is_open() {
            request.record_rejection(offer.vehicle_id);
        }
        Ok(())
    }

    /// Accepts an offer on the driver's behalf.
    ///
    /// Seat check, booking hold, boarding and trip creation run under the
    /// vehicle lock, so two accepts racing for a last seat resolve with
    /// exactly one success. A trip that cannot be opened gives back the seat
    /// and the hold.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::AlreadyResolved`] if the offer left `pending`.
    /// * [`DispatchError::Expired`] past the answer window; the offer expires.
    /// * [`DispatchError::Conflict`] if the seat went to another rider; the
    ///   offer is withdrawn and the request re-scored by the caller.
    /// * [`DispatchError::InsufficientBalance`] if the booking hold does not
    ///   fit; the offer stays pending.
    pub async fn accept(&self, offer_id: OfferId) -> Result<AcceptOutcome, DispatchError> {
        let offer_lock = self.offers.get(offer_id).await?;
        let mut offer = offer_lock.write().await;
        if !offer.is_pending() {
            return Err(DispatchError::AlreadyResolved(format!(
                "offer {offer_id} is {:?}",
                offer.status
            )));
        }
        let now = self.clock.now();
        if offer.is_past_deadline(now) {
            self.close(&mut offer, OfferStatus::Expired, now).await;
            self.reject_on_request(&offer).await?;
            self.event_bus.publish(Self::resolved_event(&offer, now));
            tracing::info!(%offer_id, "offer accepted too late");
            return Err(DispatchError::Expired(format!(
                "offer {offer_id} expired at {}",
                offer.expires_at
            )));
        }

        let request_lock = self.requests.get(offer.request_id).await?;
        let mut request = request_lock.write().await;
        if !request.is_open() {
            let status = request.status;
            drop(request);
            self.close(&mut offer, OfferStatus::Expired, now).await;
            self.event_bus.publish(Self::resolved_event(&offer, now));
            return Err(DispatchError::Conflict(format!(
                "request {} is {status:?}",
                offer.request_id
            )));
        }

        let vehicle_lock = self.fleet.lock(offer.vehicle_id).await?;
        let mut vehicle = vehicle_lock.write().await;
        if vehicle.seat_for(offer.seat_preference).is_none() {
            drop(vehicle);
            request.record_rejection(offer.vehicle_id);
            drop(request);
            self.close(&mut offer, OfferStatus::Expired, now).await;
            self.event_bus.publish(Self::resolved_event(&offer, now));
            tracing::info!(%offer_id, vehicle_id = %offer.vehicle_id, "seat lost to a concurrent accept");
            return Err(DispatchError::Conflict(format!(
                "vehicle {} has no free {:?} seat left",
                offer.vehicle_id, offer.seat_preference
            )));
        }

        let trip_id = TripId::new();
        let hold_id = self
            .escrow
            .hold_for_booking(request.payment_method, request.wallet_id, offer.shared_fare, trip_id)
            .await?
            .map(|h| h.id);
        let seat = match vehicle.board(offer.seat_preference) {
            Ok(seat) => seat,
            Err(e) => {
                self.escrow.abandon_hold(hold_id).await;
                return Err(e);
            }
        };
        let created = self
            .trips
            .create(NewTrip {
                id: trip_id,
                rider_id: request.rider_id,
                driver_id: offer.driver_id,
                vehicle_id: offer.vehicle_id,
                origin: request.origin.clone(),
                destination: request.destination.clone(),
                fare: offer.shared_fare,
                payment_method: request.payment_method,
                wallet_id: request.wallet_id,
                escrow_hold_id: hold_id,
                is_shared_ride: true,
                seat,
                offer_id: Some(offer_id),
                scheduled_trip_id: None,
            })
            .await;
        let trip = match created {
            Ok(trip) => trip,
            Err(e) => {
                vehicle.release(seat);
                drop(vehicle);
                self.escrow.abandon_hold(hold_id).await;
                tracing::warn!(%offer_id, error = %e, "trip not opened, booking undone");
                return Err(e);
            }
        };
        vehicle.status = VehicleStatus::Busy;
        vehicle.updated_at = now;
        let vehicle_snapshot = vehicle.clone();
        offer.resolve(OfferStatus::Accepted, now);
        self.book.lock().await.remove(&offer);
        drop(vehicle);
        self.timers.cancel(TimerKey::OfferExpiry(offer_id)).await;

        request.status = RequestStatus::Matched;
        let rider_id = request.rider_id;
        drop(request);
        self.timers
            .cancel(TimerKey::RequestExpiry(offer.request_id))
            .await;
        let accepted = offer.clone();
        drop(offer);

        self.event_bus.publish_all([
            self.fleet.updated_event(&vehicle_snapshot),
            Self::resolved_event(&accepted, now),
            DispatchEvent::RequestClosed {
                request_id: accepted.request_id,
                rider_id,
                status: RequestStatus::Matched,
                trip_id: Some(trip.id),
                timestamp: now,
            },
        ]);
        self.notifier.notify(
            *rider_id.as_uuid(),
            "offer_accepted",
            json!({ "trip_id": trip.id, "vehicle_id": accepted.vehicle_id, "fare": accepted.shared_fare }),
        );
        tracing::info!(
            %offer_id,
            trip_id = %trip.id,
            vehicle_id = %accepted.vehicle_id,
            passengers = vehicle_snapshot.current_passengers,
            "offer accepted"
        );
        Ok(AcceptOutcome {
            offer: accepted,
            trip,
        })
    }

    /// Declines a pending offer and returns its request for re-scoring.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the offer left `pending`.
    pub async fn decline(&self, offer_id: OfferId) -> Result<RequestId, DispatchError> {
        let offer_lock = self.offers.get(offer_id).await?;
        let mut offer = offer_lock.write().await;
        if !offer.is_pending() {
            return Err(DispatchError::AlreadyResolved(format!(
                "offer {offer_id} is {:?}",
                offer.status
            )));
        }
        let now = self.clock.now();
        self.close(&mut offer, OfferStatus::Declined, now).await;
        self.reject_on_request(&offer).await?;
        let request_id = offer.request_id;
        self.event_bus.publish(Self::resolved_event(&offer, now));
        drop(offer);

        tracing::info!(%offer_id, %request_id, "offer declined");
        Ok(request_id)
    }

    /// Expires an offer whose window closed. Returns its request for
    /// re-scoring, or `None` for a stale timer.
    pub async fn expire(&self, offer_id: OfferId) -> Option<RequestId> {
        let offer_lock = self.offers.get(offer_id).await.ok()?;
        let mut offer = offer_lock.write().await;
        let now = self.clock.now();
        if !offer.is_pending() || now < offer.expires_at {
            return None;
        }
        self.close(&mut offer, OfferStatus::Expired, now).await;
        if let Err(e) = self.reject_on_request(&offer).await {
            tracing::warn!(%offer_id, error = %e, "expired offer lost its request");
        }
        let request_id = offer.request_id;
        self.event_bus.publish(Self::resolved_event(&offer, now));
        drop(offer);

        tracing::info!(%offer_id, %request_id, "offer expired");
        Some(request_id)
    }

    /// Withdraws the pending offer of a request that stopped searching.
    pub async fn withdraw_pending_for_request(&self, request_id: RequestId) {
        let pending = self.book.lock().await.by_request.get(&request_id).copied();
        let Some(offer_id) = pending else {
            return;
        };
        let Ok(offer_lock) = self.offers.get(offer_id).await else {
            return;
        };
        let mut offer = offer_lock.write().await;
        if !offer.is_pending() {
            return;
        }
        let now = self.clock.now();
        self.close(&mut offer, OfferStatus::Expired, now).await;
        self.event_bus.publish(Self::resolved_event(&offer, now));
        self.notifier.notify(
            *offer.driver_id.as_uuid(),
            "offer_withdrawn",
            json!({ "offer_id": offer_id }),
        );
        tracing::info!(%offer_id, %request_id, "offer withdrawn");
    }

    /// Seat preferences of pending offers, per vehicle.
    pub async fn pending_by_vehicle(&self) -> HashMap<VehicleId, Vec<SeatPreference>> {
        self.book
            .lock()
            .await
            .by_vehicle
            .iter()
            .map(|(vehicle, list)| (*vehicle, list.iter().map(|(_, p)| *p).collect()))
            .collect()
    }

    /// The request's pending offer, if any.
    pub async fn pending_for_request(&self, request_id: RequestId) -> Option<OfferId> {
        self.book.lock().await.by_request.get(&request_id).copied()
    }

    /// Returns a copy of an offer.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown offer.
    pub async fn offer(&self, offer_id: OfferId) -> Result<MatchOffer, DispatchError> {
        self.offers.snapshot(offer_id).await
    }

    /// Every offer made for a request, oldest first.
    pub async fn offers_for_request(&self, request_id: RequestId) -> Vec<MatchOffer> {
        let mut offers = self
            .offers
            .snapshot_where(|o| o.request_id == request_id)
            .await;
        offers.sort_by_key(|o| o.created_at);
        offers
    }
}
