//! DTOs for vehicle and position endpoints.

use serde::Deserialize;
use utoipa::ToSchema;

use crate::domain::{Place, RideMode, VehicleStatus};

/// Partial update of a vehicle's availability.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateVehicleStatusRequest {
    /// New availability.
    #[serde(default)]
    pub status: Option<VehicleStatus>,
    /// New ride mode.
    #[serde(default)]
    pub ride_mode: Option<RideMode>,
    /// New destination.
    #[serde(default)]
    pub destination: Option<Place>,
    /// Drop the current destination. Ignored when `destination` is set.
    #[serde(default)]
    pub clear_destination: bool,
}

impl UpdateVehicleStatusRequest {
    /// Destination change in the shape the fleet expects: `None` leaves it,
    /// `Some(None)` clears it.
    #[must_use]
    pub fn destination_change(&self) -> Option<Option<Place>> {
        match (&self.destination, self.clear_destination) {
            (Some(place), _) => Some(Some(place.clone())),
            (None, true) => Some(None),
            (None, false) => None,
        }
    }
}

/// A position sample for a rider or driver.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct ReportPositionRequest {
    /// Rider or driver id.
    pub subject_id: uuid::Uuid,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}
