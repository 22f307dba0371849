//! Match offers extended to drivers under a countdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ids::{DriverId, OfferId, RequestId, RiderId, VehicleId};
use super::ride_request::SeatPreference;

/// Lifecycle of a [`MatchOffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Waiting for the driver.
    Pending,
    /// Driver accepted; a trip exists.
    Accepted,
    /// Driver declined.
    Declined,
    /// Window elapsed, or the offer was withdrawn.
    Expired,
}

/// A proposal to add one rider to one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MatchOffer {
    /// Offer identifier.
    pub id: OfferId,
    /// Request the offer serves.
    pub request_id: RequestId,
    /// Rider behind the request.
    pub rider_id: RiderId,
    /// Vehicle the rider would join.
    pub vehicle_id: VehicleId,
    /// Driver who must answer.
    pub driver_id: DriverId,
    /// Seat the rider asked for.
    pub seat_preference: SeatPreference,
    /// Added travel time for the vehicle.
    pub detour_minutes: f64,
    /// Time for the vehicle to reach the rider.
    pub pickup_eta_minutes: f64,
    /// Fare the rider pays in the shared vehicle.
    pub shared_fare: u64,
    /// Fare before the occupancy reduction.
    pub original_fare: u64,
    /// When the offer was made.
    pub created_at: DateTime<Utc>,
    /// End of the answer window.
    pub expires_at: DateTime<Utc>,
    /// Current status.
    pub status: OfferStatus,
    /// When the offer left `pending`.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl MatchOffer {
    /// Returns `true` while the driver can still answer.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OfferStatus::Pending
    }

    /// Returns `true` once `now` is past the answer window.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whole seconds left to answer, zero once the window closed.
    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }

    /// Moves the offer out of `pending`.
    pub fn resolve(&mut self, status: OfferStatus, at: DateTime<Utc>) {
        self.status = status;
        self.resolved_at = Some(at);
    }
}
