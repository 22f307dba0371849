//! Scheduled trips, driver availability slots and scheduled offers.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::geo::Place;
use super::ids::{DriverId, HoldId, RiderId, ScheduledOfferId, ScheduledTripId, TripId, WalletId};
use super::ride_request::PaymentMethod;
use super::vehicle::VehicleType;

/// Day of the week a slot repeats on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    /// Monday.
    Monday,
    /// Tuesday.
    Tuesday,
    /// Wednesday.
    Wednesday,
    /// Thursday.
    Thursday,
    /// Friday.
    Friday,
    /// Saturday.
    Saturday,
    /// Sunday.
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

/// A weekly window in which a driver takes scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DriverAvailabilitySlot {
    /// Driver offering the slot.
    pub driver_id: DriverId,
    /// Weekday the slot repeats on.
    pub day_of_week: DayOfWeek,
    /// Start of the window (UTC).
    #[schema(value_type = String, example = "07:00:00")]
    pub start_time: NaiveTime,
    /// End of the window (UTC), inclusive.
    #[schema(value_type = String, example = "10:00:00")]
    pub end_time: NaiveTime,
    /// Zone the driver starts from.
    pub origin_zone: String,
    /// Zone the driver heads to; `None` accepts any.
    pub destination_zone: Option<String>,
    /// Category of the driver's vehicle.
    pub vehicle_type: VehicleType,
}

impl DriverAvailabilitySlot {
    /// Returns `true` if this slot can serve `trip`.
    #[must_use]
    pub fn covers(&self, trip: &ScheduledTrip) -> bool {
        let day = DayOfWeek::from(trip.scheduled_at.weekday());
        let time = trip.scheduled_at.time();
        day == self.day_of_week
            && self.start_time <= time
            && time <= self.end_time
            && self.origin_zone == trip.origin_zone
            && self
                .destination_zone
                .as_ref()
                .is_none_or(|zone| *zone == trip.destination_zone)
            && self.vehicle_type == trip.vehicle_type
    }
}

/// Lifecycle of a [`ScheduledTrip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTripStatus {
    /// Booked, offers not yet accepted.
    Pending,
    /// A driver accepted.
    Matched,
    /// Rider confirmed; a trip exists.
    Confirmed,
    /// Ride done.
    Completed,
    /// Rider cancelled.
    Cancelled,
    /// Rider did not show up.
    NoShowClient,
    /// Driver did not show up.
    NoShowDriver,
}

impl ScheduledTripStatus {
    /// Returns `true` once the booking is settled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::NoShowClient | Self::NoShowDriver
        )
    }
}

/// A ride booked ahead of time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduledTrip {
    /// Booking identifier.
    pub id: ScheduledTripId,
    /// Rider who booked.
    pub rider_id: RiderId,
    /// Pickup place.
    pub origin: Place,
    /// Drop-off place.
    pub destination: Place,
    /// Zone of the pickup, matched against driver slots.
    pub origin_zone: String,
    /// Zone of the drop-off.
    pub destination_zone: String,
    /// Pickup time.
    pub scheduled_at: DateTime<Utc>,
    /// Requested vehicle category.
    pub vehicle_type: VehicleType,
    /// Fare estimate at booking time.
    pub estimated_fare: u64,
    /// Deposit held at booking time.
    pub security_deposit: u64,
    /// Hold backing the deposit.
    pub deposit_hold_id: Option<HoldId>,
    /// Wallet the deposit is held in.
    pub wallet_id: WalletId,
    /// How the ride itself is paid.
    pub payment_method: PaymentMethod,
    /// Current status.
    pub status: ScheduledTripStatus,
    /// Amount kept from the deposit on settlement.
    pub penalty_amount: u64,
    /// Driver who accepted.
    pub driver_id: Option<DriverId>,
    /// Trip created on confirmation.
    pub trip_id: Option<TripId>,
    /// Booking time.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a [`ScheduledOffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledOfferStatus {
    /// Waiting for the driver.
    Pending,
    /// Driver took the booking.
    Accepted,
    /// Driver refused.
    Declined,
    /// Another driver was faster, or the booking ended.
    Withdrawn,
}

/// A scheduled booking offered to one driver.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduledOffer {
    /// Offer identifier.
    pub id: ScheduledOfferId,
    /// Booking offered.
    pub scheduled_trip_id: ScheduledTripId,
    /// Driver asked.
    pub driver_id: DriverId,
    /// Current status.
    pub status: ScheduledOfferStatus,
    /// When the offer was sent.
    pub created_at: DateTime<Utc>,
    /// When the driver answered or the offer was withdrawn.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// How a confirmed booking ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduledResolution {
    /// Ride done; the driver was `late_minutes` past the scheduled time
    /// (zero or negative when on time).
    Completed {
        /// Minutes the driver was late.
        late_minutes: i64,
    },
    /// Rider cancelled.
    Cancelled,
    /// Rider did not show up.
    NoShowClient,
    /// Driver did not show up.
    NoShowDriver,
}

impl ScheduledResolution {
    /// Status the booking ends in.
    #[must_use]
    pub const fn status(self) -> ScheduledTripStatus {
        match self {
            Self::Completed { .. } => ScheduledTripStatus::Completed,
            Self::Cancelled => ScheduledTripStatus::Cancelled,
            Self::NoShowClient => ScheduledTripStatus::NoShowClient,
            Self::NoShowDriver => ScheduledTripStatus::NoShowDriver,
        }
    }
}
