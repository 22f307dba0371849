//! Vehicle state and the seat model used for shared rides.
//!
//! The number of passengers on board is the only piece of fleet state the
//! dispatcher mutates. `0 ≤ current_passengers ≤ capacity` holds after
//! every method in this module; the methods that could break it refuse with
//! [`DispatchError::Conflict`] instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::geo::{GeoPoint, Place};
use super::ids::{DriverId, VehicleId};
use super::ride_request::{RideMode, SeatPreference};
use crate::error::DispatchError;

/// Availability of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    /// On duty, empty or with room.
    Available,
    /// Carrying passengers.
    Busy,
    /// Off duty.
    Offline,
}

/// Vehicle category, used by scheduled bookings and driver slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    /// Regular sedan.
    Standard,
    /// Higher-end sedan.
    Comfort,
    /// Minivan.
    Van,
}

impl VehicleType {
    /// Multiplier applied to the distance fare for this category.
    #[must_use]
    pub const fn fare_multiplier(self) -> f64 {
        match self {
            Self::Standard => 1.0,
            Self::Comfort => 1.25,
            Self::Van => 1.5,
        }
    }
}

/// Last reported vehicle position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VehiclePosition {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Heading in degrees clockwise from north.
    #[serde(default)]
    pub heading: f64,
}

impl VehiclePosition {
    /// Coordinate part of the position.
    #[must_use]
    pub const fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Seat given to a rider when an offer is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeatAssignment {
    /// Front passenger seat.
    Front,
    /// A seat in the back row, possibly shared.
    Back,
    /// The whole back row.
    BackAlone,
}

/// Dispatcher's view of one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VehicleState {
    /// Vehicle identifier.
    pub id: VehicleId,
    /// Driver operating the vehicle.
    pub driver_id: DriverId,
    /// Last reported position.
    pub position: VehiclePosition,
    /// Passenger seats, driver excluded.
    pub capacity: u32,
    /// Passengers currently on board or booked.
    pub current_passengers: u32,
    /// Whether the driver takes shared or private rides.
    pub ride_mode: RideMode,
    /// Where the vehicle is heading, if anywhere.
    pub destination: Option<Place>,
    /// Availability.
    pub status: VehicleStatus,
    /// Category of the vehicle.
    pub vehicle_type: VehicleType,
    /// Front passenger seat is occupied.
    pub front_seat_taken: bool,
    /// The back row was reserved by a back-alone rider.
    pub back_row_reserved: bool,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl VehicleState {
    /// Seats still free.
    #[must_use]
    pub fn free_seats(&self) -> u32 {
        self.capacity.saturating_sub(self.current_passengers)
    }

    /// Passengers seated in the back row.
    #[must_use]
    pub fn back_passengers(&self) -> u32 {
        self.current_passengers
            .saturating_sub(u32::from(self.front_seat_taken))
    }

    fn back_capacity(&self) -> u32 {
        self.capacity.saturating_sub(1)
    }

    /// Returns `true` if the vehicle can be offered to shared riders.
    #[must_use]
    pub fn is_shared_candidate(&self) -> bool {
        matches!(self.status, VehicleStatus::Available | VehicleStatus::Busy)
            && self.ride_mode == RideMode::Shared
            && self.current_passengers < self.capacity
    }

    /// Returns the seat a rider with `pref` would get, if any.
    #[must_use]
    pub fn seat_for(&self, pref: SeatPreference) -> Option<SeatAssignment> {
        if self.current_passengers >= self.capacity {
            return None;
        }
        let back_free = !self.back_row_reserved && self.back_passengers() < self.back_capacity();
        let front_free = !self.front_seat_taken;
        match pref {
            SeatPreference::Front => front_free.then_some(SeatAssignment::Front),
            SeatPreference::BackAlone => (!self.back_row_reserved
                && self.back_passengers() == 0
                && self.back_capacity() > 0)
                .then_some(SeatAssignment::BackAlone),
            SeatPreference::Any => {
                if back_free {
                    Some(SeatAssignment::Back)
                } else if front_free {
                    Some(SeatAssignment::Front)
                } else {
                    None
                }
            }
        }
    }

    /// Seats one rider with `pref`, incrementing the passenger count.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Conflict`] if no matching seat is free.
    pub fn board(&mut self, pref: SeatPreference) -> Result<SeatAssignment, DispatchError> {
        let seat = self.seat_for(pref).ok_or_else(|| {
            DispatchError::Conflict(format!(
                "vehicle {} has no free {pref:?} seat ({}/{})",
                self.id, self.current_passengers, self.capacity
            ))
        })?;
        match seat {
            SeatAssignment::Front => self.front_seat_taken = true,
            SeatAssignment::BackAlone => self.back_row_reserved = true,
            SeatAssignment::Back => {}
        }
        self.current_passengers += 1;
        Ok(seat)
    }

    /// Frees a seat previously returned by [`Self::board`].
    pub fn release(&mut self, seat: SeatAssignment) {
        match seat {
            SeatAssignment::Front => self.front_seat_taken = false,
            SeatAssignment::BackAlone => self.back_row_reserved = false,
            SeatAssignment::Back => {}
        }
        self.current_passengers = self.current_passengers.saturating_sub(1);
    }

    /// Overrides the passenger count after a pickup outside the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] if `count` exceeds the
    /// capacity or is lower than the seats the dispatcher itself reserved.
    pub fn set_passengers(&mut self, count: u32) -> Result<(), DispatchError> {
        let reserved = u32::from(self.front_seat_taken) + u32::from(self.back_row_reserved);
        if count > self.capacity || count < reserved {
            return Err(DispatchError::InvalidRequest(format!(
                "passenger count {count} outside {reserved}..={}",
                self.capacity
            )));
        }
        self.current_passengers = count;
        Ok(())
    }

    /// Copy of this state with the given seats already taken, used to
    /// account for offers still pending on the vehicle.
    #[must_use]
    pub fn with_reserved(&self, pending: &[SeatPreference]) -> Option<Self> {
        let mut copy = self.clone();
        for pref in pending {
            copy.board(*pref).ok()?;
        }
        Some(copy)
    }
}
