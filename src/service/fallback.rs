//! Fallback Dispatcher: private quotes for searches the shared pool could
//! not serve.

use std::sync::Arc;

use serde_json::json;

use super::escrow::EscrowManager;
use super::fleet::FleetManager;
use super::negotiator::{MatchNegotiator, RequestRegistry};
use super::{pricing, secs};
use super::timers::{DeadlineScheduler, TimerKey};
use super::trips::{NewTrip, TripLifecycle};
use crate::collaborators::Notifier;
use crate::config::{FareSchedule, MatchingPolicy};
use crate::domain::{
    DispatchEvent, EventBus, FallbackReason, PrivateQuote, RequestId, RequestStatus, RideMode,
    RideRequest, SeatPreference, SharedClock, Trip, TripId, VehicleStatus,
};
use crate::error::DispatchError;

/// Turns failed shared searches into private quotes and books them.
#[derive(Debug)]
pub struct FallbackDispatcher {
    requests: Arc<RequestRegistry>,
    negotiator: Arc<MatchNegotiator>,
    fleet: Arc<FleetManager>,
    escrow: Arc<EscrowManager>,
    trips: Arc<TripLifecycle>,
    notifier: Arc<dyn Notifier>,
    timers: Arc<DeadlineScheduler>,
    fares: FareSchedule,
    matching: MatchingPolicy,
    event_bus: EventBus,
    clock: SharedClock,
}

impl FallbackDispatcher {
    /// Creates a dispatcher.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        requests: Arc<RequestRegistry>,
        negotiator: Arc<MatchNegotiator>,
        fleet: Arc<FleetManager>,
        escrow: Arc<EscrowManager>,
        trips: Arc<TripLifecycle>,
        notifier: Arc<dyn Notifier>,
        timers: Arc<DeadlineScheduler>,
        fares: FareSchedule,
        matching: MatchingPolicy,
        event_bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            requests,
            negotiator,
            fleet,
            escrow,
            trips,
            notifier,
            timers,
            fares,
            matching,
            event_bus,
            clock,
        }
    }

    /// Moves an open request to `fallback` with a private quote.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the request is no longer
    /// searching.
    pub async fn fall_back(
        &self,
        request_id: RequestId,
        reason: FallbackReason,
    ) -> Result<RideRequest, DispatchError> {
        let lock = self.requests.get(request_id).await?;
        let mut request = lock.write().await;
        if !request.is_open() {
            return Err(DispatchError::AlreadyResolved(format!(
                "request {request_id} is {:?}",
                request.status
            )));
        }
        let now = self.clock.now();
        let (shared_equivalent, vtc_price) =
            pricing::private_quote(&self.fares, request.distance_km());
        let quote = PrivateQuote {
            vtc_price,
            shared_equivalent,
            reason,
            quoted_at: now,
            valid_until: now + secs(self.matching.quote_ttl_secs),
        };
        request.status = RequestStatus::Fallback;
        request.fallback_quote = Some(quote.clone());
        let snapshot = request.clone();
        drop(request);

        self.timers.cancel(TimerKey::RequestExpiry(request_id)).await;
        self.timers
            .schedule(TimerKey::QuoteExpiry(request_id), quote.valid_until)
            .await;
        self.negotiator.withdraw_pending_for_request(request_id).await;

        self.event_bus.publish(DispatchEvent::RequestFellBack {
            request_id,
            rider_id: snapshot.rider_id,
            reason,
            vtc_price,
            valid_until: quote.valid_until,
            timestamp: now,
        });
        self.notifier.notify(
            *snapshot.rider_id.as_uuid(),
            "private_quote",
            json!({
                "request_id": request_id,
                "reason": reason,
                "vtc_price": vtc_price,
                "valid_until": quote.valid_until,
            }),
        );
        tracing::info!(%request_id, ?reason, vtc_price, "request fell back to private dispatch");
        Ok(snapshot)
    }

    /// Restarts the shared search of a request in `fallback`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] unless the request is in
    /// `fallback`.
    pub async fn retry_shared(&self, request_id: RequestId) -> Result<RideRequest, DispatchError> {
        let lock = self.requests.get(request_id).await?;
        let mut request = lock.write().await;
        if request.status != RequestStatus::Fallback {
            return Err(DispatchError::invalid_transition(
                request.status,
                RequestStatus::Open,
            ));
        }
        let now = self.clock.now();
        request.reopen(now, secs(self.matching.request_ttl_secs));
        let snapshot = request.clone();
        drop(request);

        self.timers.cancel(TimerKey::QuoteExpiry(request_id)).await;
        self.timers
            .schedule(TimerKey::RequestExpiry(request_id), snapshot.expires_at)
            .await;
        self.event_bus.publish(DispatchEvent::RequestOpened {
            request_id,
            rider_id: snapshot.rider_id,
            expires_at: snapshot.expires_at,
            timestamp: now,
        });
        tracing::info!(%request_id, "shared search retried");
        Ok(snapshot)
    }

    /// Expires a quote whose validity ran out. Returns `false` for a stale
    /// timer.
    pub async fn expire_quote(&self, request_id: RequestId) -> bool {
        let Ok(lock) = self.requests.get(request_id).await else {
            return false;
        };
        let mut request = lock.write().await;
        let now = self.clock.now();
        let due = request.status == RequestStatus::Fallback
            && request
                .fallback_quote
                .as_ref()
                .is_some_and(|q| q.valid_until <= now);
        if !due {
            return false;
        }
        request.status = RequestStatus::Expired;
        let rider_id = request.rider_id;
        drop(request);

        self.event_bus.publish(DispatchEvent::RequestClosed {
            request_id,
            rider_id,
            status: RequestStatus::Expired,
            trip_id: None,
            timestamp: now,
        });
        self.notifier
            .notify(*rider_id.as_uuid(), "quote_expired", json!({ "request_id": request_id }));
        tracing::info!(%request_id, "private quote expired");
        true
    }

    /// Books the private quote with the nearest idle private-mode vehicle.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::InvalidTransition`] unless the request is in
    ///   `fallback`.
    /// * [`DispatchError::Expired`] once the quote is no longer valid.
    /// * [`DispatchError::Conflict`] when no private vehicle is free.
    /// * [`DispatchError::InsufficientBalance`] if the booking hold does not
    ///   fit; the request keeps its quote.
    pub async fn accept_private_quote(&self, request_id: RequestId) -> Result<Trip, DispatchError> {
        let lock = self.requests.get(request_id).await?;
        let mut request = lock.write().await;
        if request.status != RequestStatus::Fallback {
            return Err(if request.status == RequestStatus::Expired {
                DispatchError::Expired(format!("quote of request {request_id} expired"))
            } else {
                DispatchError::invalid_transition(request.status, RequestStatus::Matched)
            });
        }
        let now = self.clock.now();
        let Some(quote) = request.fallback_quote.clone() else {
            return Err(DispatchError::Internal(format!(
                "request {request_id} is in fallback without a quote"
            )));
        };
        if now > quote.valid_until {
            return Err(DispatchError::Expired(format!(
                "quote of request {request_id} expired at {}",
                quote.valid_until
            )));
        }

        let origin = request.origin.point();
        let mut idle = self
            .fleet
            .list()
            .await
            .into_iter()
            .filter(|v| {
                v.ride_mode == RideMode::Private
                    && v.status == VehicleStatus::Available
                    && v.current_passengers == 0
            })
            .collect::<Vec<_>>();
        idle.sort_by(|a, b| {
            a.position
                .point()
                .distance_km(&origin)
                .total_cmp(&b.position.point().distance_km(&origin))
        });

        let trip_id = TripId::new();
        for candidate in idle {
            let vehicle_lock = self.fleet.lock(candidate.id).await?;
            let mut vehicle = vehicle_lock.write().await;
            if vehicle.status != VehicleStatus::Available
                || vehicle.current_passengers > 0
                || vehicle.ride_mode != RideMode::Private
            {
                continue;
            }
            let hold_id = self
                .escrow
                .hold_for_booking(
                    request.payment_method,
                    request.wallet_id,
                    quote.vtc_price,
                    trip_id,
                )
                .await?
                .map(|h| h.id);
            let seat = match vehicle.board(SeatPreference::Any) {
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
                    driver_id: vehicle.driver_id,
                    vehicle_id: vehicle.id,
                    origin: request.origin.clone(),
                    destination: request.destination.clone(),
                    fare: quote.vtc_price,
                    payment_method: request.payment_method,
                    wallet_id: request.wallet_id,
                    escrow_hold_id: hold_id,
                    is_shared_ride: false,
                    seat,
                    offer_id: None,
                    scheduled_trip_id: None,
                })
                .await;
            let trip = match created {
                Ok(trip) => trip,
                Err(e) => {
                    vehicle.release(seat);
                    drop(vehicle);
                    self.escrow.abandon_hold(hold_id).await;
                    tracing::warn!(%request_id, error = %e, "private trip not opened, booking undone");
                    return Err(e);
                }
            };
            vehicle.status = VehicleStatus::Busy;
            vehicle.updated_at = now;
            let vehicle_snapshot = vehicle.clone();
            drop(vehicle);

            request.status = RequestStatus::Matched;
            let rider_id = request.rider_id;
            drop(request);

            self.timers.cancel(TimerKey::QuoteExpiry(request_id)).await;
            self.event_bus.publish_all([
                self.fleet.updated_event(&vehicle_snapshot),
                DispatchEvent::RequestClosed {
                    request_id,
                    rider_id,
                    status: RequestStatus::Matched,
                    trip_id: Some(trip.id),
                    timestamp: now,
                },
            ]);
            tracing::info!(
                %request_id,
                trip_id = %trip.id,
                vehicle_id = %vehicle_snapshot.id,
                fare = quote.vtc_price,
                "private quote booked"
            );
            return Ok(trip);
        }

        tracing::debug!(%request_id, "no private vehicle free");
        Err(DispatchError::Conflict(format!(
            "no private vehicle available for request {request_id}"
        )))
    }
}
