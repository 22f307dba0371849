//! Trip state machine shared by the rider and driver views.
//!
//! ```text
//! assigned → arriving → arrived → waiting → onboard → in_progress
//!     → arriving_destination → completed
//!
//! assigned | arriving | arrived | waiting → cancelled_with_penalty
//! waiting (timer expired)                 → cancelled_no_penalty
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::geo::Place;
use super::ids::{DriverId, HoldId, OfferId, RiderId, ScheduledTripId, TripId, VehicleId, WalletId};
use super::ride_request::PaymentMethod;
use super::vehicle::SeatAssignment;
use crate::error::DispatchError;

/// Stage of a [`Trip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Driver assigned, not yet moving.
    Assigned,
    /// Driver heading to the pickup.
    Arriving,
    /// Driver entered the pickup geofence.
    Arrived,
    /// Client-wait timer running.
    Waiting,
    /// Driver confirmed the client is aboard.
    Onboard,
    /// Underway to the destination.
    InProgress,
    /// Close to the destination.
    ArrivingDestination,
    /// Dropped off and settled.
    Completed,
    /// Cancelled after the client-wait timer expired.
    CancelledNoPenalty,
    /// Cancelled before pickup with a penalty.
    CancelledWithPenalty,
}

impl TripStatus {
    /// Returns `true` for completed and cancelled trips.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CancelledNoPenalty | Self::CancelledWithPenalty
        )
    }

    /// Returns `true` while the rider has not boarded yet.
    #[must_use]
    pub const fn is_before_onboard(self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::Arriving | Self::Arrived | Self::Waiting
        )
    }

    /// Returns `true` if the machine allows `self → next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Assigned, Self::Arriving)
                | (Self::Arriving, Self::Arrived)
                | (Self::Arrived, Self::Waiting)
                | (Self::Waiting, Self::Onboard)
                | (Self::Onboard, Self::InProgress)
                | (Self::InProgress, Self::ArrivingDestination)
                | (Self::ArrivingDestination, Self::Completed)
                | (Self::Waiting, Self::CancelledNoPenalty)
                | (
                    Self::Assigned | Self::Arriving | Self::Arrived | Self::Waiting,
                    Self::CancelledWithPenalty
                )
        )
    }
}

/// When a trip entered a stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StageTimestamp {
    /// Stage entered.
    pub status: TripStatus,
    /// Entry time.
    pub at: DateTime<Utc>,
}

/// Party that cancelled a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    /// The rider.
    Rider,
    /// The driver.
    Driver,
}

/// Money movements made when the trip ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Settlement {
    /// Amount captured from the escrow hold.
    pub captured: u64,
    /// Amount debited directly from the wallet.
    pub debited: u64,
    /// Hold amount returned to the wallet.
    pub released: u64,
}

/// A confirmed ride between one rider and one driver.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Trip {
    /// Trip identifier.
    pub id: TripId,
    /// Rider.
    pub rider_id: RiderId,
    /// Driver.
    pub driver_id: DriverId,
    /// Vehicle.
    pub vehicle_id: VehicleId,
    /// Pickup place.
    pub origin: Place,
    /// Drop-off place.
    pub destination: Place,
    /// Fare owed on completion.
    pub fare: u64,
    /// How the fare is paid.
    pub payment_method: PaymentMethod,
    /// Wallet backing the escrow hold and the fare.
    pub wallet_id: Option<WalletId>,
    /// Current stage.
    pub status: TripStatus,
    /// Stages entered so far, in order.
    pub stage_timestamps: Vec<StageTimestamp>,
    /// Escrow hold taken at booking.
    pub escrow_hold_id: Option<HoldId>,
    /// Shared with other riders.
    pub is_shared_ride: bool,
    /// Seat held by the rider.
    pub seat: SeatAssignment,
    /// Offer this trip came from.
    pub offer_id: Option<OfferId>,
    /// Scheduled booking this trip came from.
    pub scheduled_trip_id: Option<ScheduledTripId>,
    /// Who cancelled, for cancelled trips.
    pub cancelled_by: Option<CancelledBy>,
    /// Money moved when the trip ended.
    pub settlement: Option<Settlement>,
}

impl Trip {
    /// Time the trip entered `status`, if it did.
    #[must_use]
    pub fn entered_at(&self, status: TripStatus) -> Option<DateTime<Utc>> {
        self.stage_timestamps
            .iter()
            .find(|s| s.status == status)
            .map(|s| s.at)
    }

    /// Creation time (entry into `assigned`).
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at(TripStatus::Assigned)
    }

    /// Moves the trip to `next`, recording the stage timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyResolved`] for terminal trips and
    /// [`DispatchError::InvalidTransition`] for any other disallowed move.
    pub fn transition(&mut self, next: TripStatus, at: DateTime<Utc>) -> Result<(), DispatchError> {
        if self.status.is_terminal() {
            return Err(DispatchError::AlreadyResolved(format!(
                "trip {} is {:?}",
                self.id, self.status
            )));
        }
        if !self.status.can_transition_to(next) {
            return Err(DispatchError::invalid_transition(self.status, next));
        }
        self.status = next;
        self.stage_timestamps.push(StageTimestamp { status: next, at });
        Ok(())
    }
}
