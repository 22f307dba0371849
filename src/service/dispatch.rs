//! Dispatch facade: wires the services together and owns the automatic
//! steps between them (re-scoring, fallback, timer handling).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use super::escrow::EscrowManager;
use super::fallback::FallbackDispatcher;
use super::fleet::FleetManager;
use super::negotiator::{AcceptOutcome, MatchNegotiator, RequestRegistry};
use super::presence::{PresenceCheck, PresenceValidator};
use super::reliability::ReliabilityTracker;
use super::scheduling::SchedulingService;
use super::scorer::CandidateScorer;
use super::timers::{DeadlineScheduler, TimerKey};
use super::trips::{ArrivalReport, TripLifecycle};
use crate::collaborators::{
    BusNotifier, EtaOracle, GeolocationSource, HaversineEtaOracle, Notifier, PositionCache,
};
use crate::config::{DispatchParams, MatchingPolicy};
use crate::domain::{
    CancelledBy, DispatchEvent, EventBus, FallbackReason, GeoPoint, HoldId, HoldReason, MatchOffer,
    OfferId, PaymentMethod, Place, RequestId, RequestStatus, RideMode, RideRequest, RiderId,
    SeatPreference, SharedClock, Trip, TripId, VehicleState, WalletHold, WalletId,
};
use crate::error::DispatchError;

/// A rider's shared-ride search.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSearch {
    /// Rider searching.
    pub rider_id: RiderId,
    /// Pickup.
    pub origin: Place,
    /// Drop-off.
    pub destination: Place,
    /// Requested mode; only `shared` is searched.
    #[serde(default = "default_mode")]
    pub mode: RideMode,
    /// Requested seat.
    #[serde(default = "default_seat")]
    pub seat_preference: SeatPreference,
    /// How the fare is paid.
    pub payment_method: PaymentMethod,
    /// Wallet for wallet payments and cash cautions.
    #[serde(default)]
    pub wallet_id: Option<WalletId>,
}

const fn default_mode() -> RideMode {
    RideMode::Shared
}

const fn default_seat() -> SeatPreference {
    SeatPreference::Any
}

/// Where a search stands after a scoring pass.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchOutcome {
    /// The request.
    pub request: RideRequest,
    /// The offer currently pending, if any.
    pub offer: Option<MatchOffer>,
}

/// Entry point of the dispatch core.
///
/// Every public operation of the core is reachable from here. Services are
/// exposed through accessors for read paths and for operations that need
/// no cross-service follow-up.
#[derive(Debug)]
pub struct DispatchService {
    params: DispatchParams,
    requests: Arc<RequestRegistry>,
    positions: Arc<PositionCache>,
    fleet: Arc<FleetManager>,
    escrow: Arc<EscrowManager>,
    presence: Arc<PresenceValidator>,
    trips: Arc<TripLifecycle>,
    negotiator: Arc<MatchNegotiator>,
    fallback: FallbackDispatcher,
    scorer: CandidateScorer,
    reliability: Arc<ReliabilityTracker>,
    scheduling: SchedulingService,
    timers: Arc<DeadlineScheduler>,
    event_bus: EventBus,
    clock: SharedClock,
}

impl DispatchService {
    /// Creates the core with the in-process collaborators: great-circle
    /// ETAs and notifications delivered on the event bus.
    #[must_use]
    pub fn new(params: DispatchParams, event_bus: EventBus, clock: SharedClock) -> Self {
        let eta: Arc<dyn EtaOracle> = Arc::new(HaversineEtaOracle::new(&params.eta));
        let notifier: Arc<dyn Notifier> =
            Arc::new(BusNotifier::new(event_bus.clone(), Arc::clone(&clock)));
        Self::with_collaborators(params, eta, notifier, event_bus, clock)
    }

    /// Creates the core around external ETA and notification providers.
    #[must_use]
    pub fn with_collaborators(
        params: DispatchParams,
        eta: Arc<dyn EtaOracle>,
        notifier: Arc<dyn Notifier>,
        event_bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        let requests = Arc::new(RequestRegistry::new("request"));
        let positions = Arc::new(PositionCache::new());
        let timers = Arc::new(DeadlineScheduler::new());
        let fleet = Arc::new(FleetManager::new(
            Arc::clone(&positions),
            event_bus.clone(),
            Arc::clone(&clock),
        ));
        let escrow = Arc::new(EscrowManager::new(
            params.escrow.clone(),
            event_bus.clone(),
            Arc::clone(&clock),
        ));
        let presence = Arc::new(PresenceValidator::new(
            params.presence.clone(),
            Arc::clone(&timers),
            event_bus.clone(),
            Arc::clone(&clock),
        ));
        let trips = Arc::new(TripLifecycle::new(
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            Arc::clone(&presence),
            Arc::clone(&positions) as Arc<dyn GeolocationSource>,
            Arc::clone(&eta),
            Arc::clone(&notifier),
            params.matching.clone(),
            event_bus.clone(),
            Arc::clone(&clock),
        ));
        let negotiator = Arc::new(MatchNegotiator::new(
            Arc::clone(&requests),
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            Arc::clone(&trips),
            Arc::clone(&notifier),
            Arc::clone(&timers),
            params.matching.clone(),
            event_bus.clone(),
            Arc::clone(&clock),
        ));
        let fallback = FallbackDispatcher::new(
            Arc::clone(&requests),
            Arc::clone(&negotiator),
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            Arc::clone(&trips),
            Arc::clone(&notifier),
            Arc::clone(&timers),
            params.fares.clone(),
            params.matching.clone(),
            event_bus.clone(),
            Arc::clone(&clock),
        );
        let scorer = CandidateScorer::new(eta, params.matching.clone(), params.fares.clone());
        let reliability = Arc::new(ReliabilityTracker::new(
            params.reliability.clone(),
            event_bus.clone(),
            Arc::clone(&clock),
        ));
        let scheduling = SchedulingService::new(
            Arc::clone(&fleet),
            Arc::clone(&escrow),
            Arc::clone(&trips),
            Arc::clone(&reliability),
            notifier,
            params.fares.clone(),
            params.reliability.clone(),
            event_bus.clone(),
            Arc::clone(&clock),
        );
        Self {
            params,
            requests,
            positions,
            fleet,
            escrow,
            presence,
            trips,
            negotiator,
            fallback,
            scorer,
            reliability,
            scheduling,
            timers,
            event_bus,
            clock,
        }
    }

    /// Dispatch parameters in force.
    #[must_use]
    pub fn params(&self) -> &DispatchParams {
        &self.params
    }

    fn matching(&self) -> &MatchingPolicy {
        &self.params.matching
    }

    /// The event bus every service publishes on.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Vehicles and their seats.
    #[must_use]
    pub fn fleet(&self) -> &FleetManager {
        &self.fleet
    }

    /// Wallets and holds.
    #[must_use]
    pub fn escrow(&self) -> &EscrowManager {
        &self.escrow
    }

    /// Presence validations and their audit logs.
    #[must_use]
    pub fn presence(&self) -> &PresenceValidator {
        &self.presence
    }

    /// Trips.
    #[must_use]
    pub fn trips(&self) -> &TripLifecycle {
        &self.trips
    }

    /// Match offers.
    #[must_use]
    pub fn negotiator(&self) -> &MatchNegotiator {
        &self.negotiator
    }

    /// Driver reliability.
    #[must_use]
    pub fn reliability(&self) -> &ReliabilityTracker {
        &self.reliability
    }

    /// Scheduled bookings.
    #[must_use]
    pub fn scheduling(&self) -> &SchedulingService {
        &self.scheduling
    }

    /// Deadline timers.
    #[must_use]
    pub fn timers(&self) -> &DeadlineScheduler {
        &self.timers
    }

    /// Current time on the core's clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    // ── searches ────────────────────────────────────────────────────────

    /// Opens a shared search and extends the first offer, or falls back to
    /// a private quote when nothing fits.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for a non-shared mode, bad
    /// coordinates or a wallet payment without a wallet, and
    /// [`DispatchError::NotFound`] for an unknown wallet.
    pub async fn search_match(&self, search: NewSearch) -> Result<SearchOutcome, DispatchError> {
        if search.mode != RideMode::Shared {
            return Err(DispatchError::InvalidRequest(format!(
                "{:?} rides are not searched; use the scheduled-trip booking or the private fallback",
                search.mode
            )));
        }
        if !search.origin.point().is_valid() || !search.destination.point().is_valid() {
            return Err(DispatchError::InvalidRequest(
                "coordinate out of range".to_string(),
            ));
        }
        match (search.payment_method, search.wallet_id) {
            (PaymentMethod::Wallet, None) => {
                return Err(DispatchError::InvalidRequest(
                    "wallet payment requires a wallet_id".to_string(),
                ));
            }
            (_, Some(wallet_id)) => {
                self.escrow.wallet(wallet_id).await?;
            }
            (PaymentMethod::Cash, None) => {}
        }

        let now = self.clock.now();
        let request = RideRequest {
            id: RequestId::new(),
            rider_id: search.rider_id,
            origin: search.origin,
            destination: search.destination,
            mode: search.mode,
            seat_preference: search.seat_preference,
            payment_method: search.payment_method,
            wallet_id: search.wallet_id,
            status: RequestStatus::Open,
            created_at: now,
            expires_at: now + super::secs(self.matching().request_ttl_secs),
            rejected_offers: 0,
            excluded_vehicles: Vec::new(),
            fallback_quote: None,
        };
        let request_id = request.id;
        self.requests.insert(request_id, request.clone()).await?;
        self.timers
            .schedule(TimerKey::RequestExpiry(request_id), request.expires_at)
            .await;
        self.event_bus.publish(DispatchEvent::RequestOpened {
            request_id,
            rider_id: request.rider_id,
            expires_at: request.expires_at,
            timestamp: now,
        });
        tracing::info!(
            %request_id,
            rider_id = %request.rider_id,
            seat = ?request.seat_preference,
            "shared search opened"
        );
        self.run_matching(request_id).await
    }

    /// One scoring pass for an open request.
    ///
    /// Keeps an already pending offer, falls back once rejections are
    /// exhausted or nothing fits, and otherwise proposes to the best
    /// candidate whose seat is still free.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown request and
    /// propagates ETA oracle failures.
    pub async fn run_matching(&self, request_id: RequestId) -> Result<SearchOutcome, DispatchError> {
        let request = self.requests.snapshot(request_id).await?;
        if !request.is_open() {
            return self.outcome(request_id).await;
        }
        if self.negotiator.pending_for_request(request_id).await.is_some() {
            return self.outcome(request_id).await;
        }
        if request.rejected_offers >= self.matching().max_offer_rejections {
            return self.fall_back(request_id, FallbackReason::NoMatch).await;
        }

        let reserved = self.negotiator.pending_by_vehicle().await;
        let vehicles: Vec<VehicleState> = self
            .fleet
            .list()
            .await
            .into_iter()
            .filter_map(|v| match reserved.get(&v.id) {
                Some(pending) => v.with_reserved(pending),
                None => Some(v),
            })
            .collect();
        let blocked = self.reliability.blocked_drivers().await;
        let scoring = self.scorer.score(&request, &vehicles, &blocked).await?;
        tracing::debug!(
            %request_id,
            considered = scoring.considered,
            candidates = scoring.candidates.len(),
            "request scored"
        );

        for candidate in &scoring.candidates {
            match self.negotiator.propose(request_id, candidate).await {
                Ok(_) => return self.outcome(request_id).await,
                Err(DispatchError::Conflict(reason)) => {
                    tracing::debug!(%request_id, vehicle_id = %candidate.vehicle_id, %reason, "candidate skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if self.negotiator.pending_for_request(request_id).await.is_some() {
            return self.outcome(request_id).await;
        }

        let reason = if scoring.considered == 0 {
            FallbackReason::NoPassengers
        } else {
            FallbackReason::NoMatch
        };
        self.fall_back(request_id, reason).await
    }

    async fn fall_back(
        &self,
        request_id: RequestId,
        reason: FallbackReason,
    ) -> Result<SearchOutcome, DispatchError> {
        match self.fallback.fall_back(request_id, reason).await {
            Ok(_) | Err(DispatchError::AlreadyResolved(_)) => self.outcome(request_id).await,
            Err(e) => Err(e),
        }
    }

    async fn outcome(&self, request_id: RequestId) -> Result<SearchOutcome, DispatchError> {
        let request = self.requests.snapshot(request_id).await?;
        let offer = match self.negotiator.pending_for_request(request_id).await {
            Some(offer_id) => self.negotiator.offer(offer_id).await.ok(),
            None => None,
        };
        Ok(SearchOutcome { request, offer })
    }

    async fn rescore(&self, request_id: RequestId) {
        if let Err(e) = self.run_matching(request_id).await {
            tracing::warn!(%request_id, error = %e, "re-scoring failed");
        }
    }

    /// Returns a copy of a request.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown request.
    pub async fn request(&self, request_id: RequestId) -> Result<SearchOutcome, DispatchError> {
        self.outcome(request_id).await
    }

    /// Accepts an offer on the driver's behalf.
    ///
    /// A lost seat or a closed window re-scores the request before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// See [`MatchNegotiator::accept`].
    pub async fn accept_offer(&self, offer_id: OfferId) -> Result<AcceptOutcome, DispatchError> {
        match self.negotiator.accept(offer_id).await {
            Err(e @ (DispatchError::Conflict(_) | DispatchError::Expired(_))) => {
                if let Ok(offer) = self.negotiator.offer(offer_id).await {
                    self.rescore(offer.request_id).await;
                }
                Err(e)
            }
            result => result,
        }
    }

    /// Declines an offer and re-scores its request without the vehicle.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] if the offer left
    /// `pending`.
    pub async fn decline_offer(&self, offer_id: OfferId) -> Result<SearchOutcome, DispatchError> {
        let request_id = self.negotiator.decline(offer_id).await?;
        self.run_matching(request_id).await
    }

    /// Cancels a search or an unanswered quote.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] once the request was
    /// matched, expired or cancelled.
    pub async fn cancel_request(&self, request_id: RequestId) -> Result<RideRequest, DispatchError> {
        let lock = self.requests.get(request_id).await?;
        let mut request = lock.write().await;
        if !matches!(request.status, RequestStatus::Open | RequestStatus::Fallback) {
            return Err(DispatchError::AlreadyResolved(format!(
                "request {request_id} is {:?}",
                request.status
            )));
        }
        request.status = RequestStatus::Cancelled;
        let snapshot = request.clone();
        drop(request);

        self.timers.cancel(TimerKey::RequestExpiry(request_id)).await;
        self.timers.cancel(TimerKey::QuoteExpiry(request_id)).await;
        self.negotiator.withdraw_pending_for_request(request_id).await;
        self.event_bus.publish(DispatchEvent::RequestClosed {
            request_id,
            rider_id: snapshot.rider_id,
            status: RequestStatus::Cancelled,
            trip_id: None,
            timestamp: self.clock.now(),
        });
        tracing::info!(%request_id, "request cancelled");
        Ok(snapshot)
    }

    /// Restarts the shared search of a request in `fallback`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] unless the request is in
    /// `fallback`.
    pub async fn retry_shared_search(
        &self,
        request_id: RequestId,
    ) -> Result<SearchOutcome, DispatchError> {
        self.fallback.retry_shared(request_id).await?;
        self.run_matching(request_id).await
    }

    /// Books the private quote of a request in `fallback`.
    ///
    /// # Errors
    ///
    /// See [`FallbackDispatcher::accept_private_quote`].
    pub async fn accept_private_quote(&self, request_id: RequestId) -> Result<Trip, DispatchError> {
        self.fallback.accept_private_quote(request_id).await
    }

    // ── trips ───────────────────────────────────────────────────────────

    /// The driver's "I've arrived" action.
    ///
    /// # Errors
    ///
    /// See [`TripLifecycle::report_arrival`].
    pub async fn report_arrival(
        &self,
        trip_id: TripId,
        driver_pos: Option<GeoPoint>,
        rider_pos: Option<GeoPoint>,
    ) -> Result<ArrivalReport, DispatchError> {
        self.trips.report_arrival(trip_id, driver_pos, rider_pos).await
    }

    /// A position check during pickup.
    ///
    /// # Errors
    ///
    /// See [`TripLifecycle::check_position`].
    pub async fn check_position(
        &self,
        trip_id: TripId,
        driver_pos: Option<GeoPoint>,
        rider_pos: Option<GeoPoint>,
    ) -> Result<PresenceCheck, DispatchError> {
        self.trips.check_position(trip_id, driver_pos, rider_pos).await
    }

    /// The driver's "client aboard" confirmation.
    ///
    /// # Errors
    ///
    /// See [`TripLifecycle::confirm_boarding`].
    pub async fn confirm_boarding(&self, trip_id: TripId) -> Result<Trip, DispatchError> {
        self.trips.confirm_boarding(trip_id).await
    }

    /// Progress report from the vehicle.
    ///
    /// # Errors
    ///
    /// See [`TripLifecycle::advance`].
    pub async fn advance_trip(
        &self,
        trip_id: TripId,
        position: Option<GeoPoint>,
    ) -> Result<Trip, DispatchError> {
        let trip = self.trips.advance(trip_id, position).await?;
        self.settle_booking(&trip).await;
        Ok(trip)
    }

    /// The driver's drop-off confirmation.
    ///
    /// # Errors
    ///
    /// See [`TripLifecycle::complete`].
    pub async fn complete_trip(&self, trip_id: TripId) -> Result<Trip, DispatchError> {
        let trip = self.trips.complete(trip_id).await?;
        self.settle_booking(&trip).await;
        Ok(trip)
    }

    /// Cancels a trip before pickup.
    ///
    /// # Errors
    ///
    /// See [`TripLifecycle::cancel`].
    pub async fn cancel_trip(&self, trip_id: TripId, by: CancelledBy) -> Result<Trip, DispatchError> {
        let trip = self.trips.cancel(trip_id, by).await?;
        self.settle_booking(&trip).await;
        Ok(trip)
    }

    async fn settle_booking(&self, trip: &Trip) {
        if trip.scheduled_trip_id.is_none() || !trip.status.is_terminal() {
            return;
        }
        if let Err(e) = self.scheduling.resolve_from_trip(trip).await {
            tracing::warn!(trip_id = %trip.id, error = %e, "scheduled trip left unresolved");
        }
    }

    // ── money ───────────────────────────────────────────────────────────

    /// Places a hold on a wallet.
    ///
    /// # Errors
    ///
    /// See [`EscrowManager::place_hold`].
    pub async fn place_hold(
        &self,
        wallet_id: WalletId,
        amount: u64,
        reason: HoldReason,
        trip_id: Option<TripId>,
    ) -> Result<WalletHold, DispatchError> {
        self.escrow.place_hold(wallet_id, amount, reason, trip_id).await
    }

    /// Releases a hold.
    ///
    /// # Errors
    ///
    /// See [`EscrowManager::release_hold`].
    pub async fn release_hold(&self, hold_id: HoldId) -> Result<WalletHold, DispatchError> {
        self.escrow.release_hold(hold_id).await
    }

    /// Captures part or all of a hold.
    ///
    /// # Errors
    ///
    /// See [`EscrowManager::capture_hold`].
    pub async fn capture_hold(&self, hold_id: HoldId, amount: u64) -> Result<WalletHold, DispatchError> {
        self.escrow.capture_hold(hold_id, amount).await
    }

    // ── positions ───────────────────────────────────────────────────────

    /// Stores a rider or driver position sample.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for out-of-range
    /// coordinates.
    pub async fn report_position(&self, subject: uuid::Uuid, point: GeoPoint) -> Result<(), DispatchError> {
        self.positions.report(subject, point).await
    }

    // ── timers ──────────────────────────────────────────────────────────

    /// Fires every deadline that has passed. Returns how many fired.
    pub async fn fire_due_timers(&self) -> usize {
        let due = self.timers.pop_due(self.clock.now()).await;
        for key in &due {
            self.fire(*key).await;
        }
        due.len()
    }

    async fn fire(&self, key: TimerKey) {
        tracing::debug!(?key, "timer fired");
        match key {
            TimerKey::OfferExpiry(offer_id) => {
                if let Some(request_id) = self.negotiator.expire(offer_id).await {
                    self.rescore(request_id).await;
                }
            }
            TimerKey::RequestExpiry(request_id) => {
                let now = self.clock.now();
                let due = self
                    .requests
                    .snapshot(request_id)
                    .await
                    .is_ok_and(|r| r.is_open() && r.expires_at <= now);
                if due {
                    if let Err(e) = self.fallback.fall_back(request_id, FallbackReason::Timeout).await {
                        tracing::warn!(%request_id, error = %e, "request timeout not applied");
                    }
                }
            }
            TimerKey::QuoteExpiry(request_id) => {
                self.fallback.expire_quote(request_id).await;
            }
            TimerKey::PresenceTimer(trip_id) => {
                self.trips.on_presence_timer(trip_id).await;
            }
        }
    }

    /// Runs the timer loop until the task is dropped.
    ///
    /// Sleeps until the earliest deadline or until a new one is armed.
    pub async fn run_timer_loop(self: Arc<Self>) {
        const IDLE: std::time::Duration = std::time::Duration::from_secs(60);
        tracing::info!("timer loop started");
        loop {
            self.fire_due_timers().await;
            let wait = match self.timers.next_deadline().await {
                Some(deadline) => (deadline - self.clock.now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO)
                    .min(IDLE),
                None => IDLE,
            };
            if wait.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.timers.changed() => {}
            }
        }
    }

    /// Counts of live entities, for the health endpoint.
    pub async fn stats(&self) -> serde_json::Value {
        json!({
            "requests": self.requests.len().await,
            "vehicles": self.fleet.list().await.len(),
            "trips": self.trips.list().await.len(),
            "armed_timers": self.timers.armed().await,
            "ws_receivers": self.event_bus.receiver_count(),
        })
    }
}
