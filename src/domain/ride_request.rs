//! Rider search requests and their private fallback quotes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::geo::Place;
use super::ids::{RequestId, RiderId, VehicleId, WalletId};

/// How the rider wants to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RideMode {
    /// Pooled ride with other riders going the same way.
    Shared,
    /// Whole vehicle for one rider.
    Private,
    /// Booked ahead of time.
    Scheduled,
}

/// Seat the rider asks for in a shared vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeatPreference {
    /// Any free seat.
    Any,
    /// The front passenger seat.
    Front,
    /// The back row with nobody else in it.
    BackAlone,
}

/// How the trip is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Charged to the rider's wallet.
    Wallet,
    /// Paid to the driver in cash.
    Cash,
}

/// Lifecycle of a [`RideRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Searching for a shared vehicle.
    Open,
    /// A trip was created for this request.
    Matched,
    /// Shared search gave up; a private quote is on the table.
    Fallback,
    /// The private quote lapsed unanswered.
    Expired,
    /// The rider abandoned the search.
    Cancelled,
}

/// Why a shared search fell back to private dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Shared vehicles exist but none is compatible, or too many offers
    /// were declined.
    NoMatch,
    /// The search deadline passed.
    Timeout,
    /// No shared-mode vehicle is on the road at all.
    NoPassengers,
}

/// Price offered for a private, non-shared trip after a failed search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PrivateQuote {
    /// Private dispatch price.
    pub vtc_price: u64,
    /// Shared fare the quote was derived from.
    pub shared_equivalent: u64,
    /// Why the shared search failed.
    pub reason: FallbackReason,
    /// When the quote was produced.
    pub quoted_at: DateTime<Utc>,
    /// After this instant the quote can no longer be accepted.
    pub valid_until: DateTime<Utc>,
}

/// A rider's search for a shared trip.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RideRequest {
    /// Request identifier.
    pub id: RequestId,
    /// Rider who owns the request.
    pub rider_id: RiderId,
    /// Pickup place.
    pub origin: Place,
    /// Drop-off place.
    pub destination: Place,
    /// Requested travel mode.
    pub mode: RideMode,
    /// Requested seat.
    pub seat_preference: SeatPreference,
    /// How the trip will be paid.
    pub payment_method: PaymentMethod,
    /// Wallet holds are taken from; required for wallet payment.
    pub wallet_id: Option<WalletId>,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Search deadline; past it the request falls back with `timeout`.
    pub expires_at: DateTime<Utc>,
    /// Offers declined or expired during the current search.
    pub rejected_offers: u32,
    /// Vehicles already tried during the current search.
    pub excluded_vehicles: Vec<VehicleId>,
    /// Private quote, set while the request is in fallback.
    pub fallback_quote: Option<PrivateQuote>,
}

impl RideRequest {
    /// Returns `true` while the shared search is running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == RequestStatus::Open
    }

    /// Great-circle length of the rider's own journey.
    #[must_use]
    pub fn distance_km(&self) -> f64 {
        self.origin.point().distance_km(&self.destination.point())
    }

    /// Records a declined or expired offer and excludes its vehicle from
    /// the next scoring pass.
    pub fn record_rejection(&mut self, vehicle_id: VehicleId) {
        self.rejected_offers = self.rejected_offers.saturating_add(1);
        if !self.excluded_vehicles.contains(&vehicle_id) {
            self.excluded_vehicles.push(vehicle_id);
        }
    }

    /// Puts the request back into `open` with a fresh search deadline.
    pub fn reopen(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.status = RequestStatus::Open;
        self.expires_at = now + ttl;
        self.rejected_offers = 0;
        self.excluded_vehicles.clear();
        self.fallback_quote = None;
    }
}
