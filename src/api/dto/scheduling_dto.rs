//! DTOs for scheduled-trip and driver endpoints.

use chrono::NaiveTime;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::domain::{DayOfWeek, DriverAvailabilitySlot, DriverId, VehicleType};

/// A weekly availability slot for the driver in the path.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddSlotRequest {
    /// Weekday.
    pub day_of_week: DayOfWeek,
    /// Start of the window (UTC).
    #[schema(value_type = String, example = "07:00:00")]
    pub start_time: NaiveTime,
    /// End of the window (UTC).
    #[schema(value_type = String, example = "10:00:00")]
    pub end_time: NaiveTime,
    /// Zone the driver starts from.
    pub origin_zone: String,
    /// Zone the driver heads to; any when absent.
    #[serde(default)]
    pub destination_zone: Option<String>,
    /// Vehicle category.
    pub vehicle_type: VehicleType,
}

impl AddSlotRequest {
    /// The slot for `driver_id`.
    #[must_use]
    pub fn into_slot(self, driver_id: DriverId) -> DriverAvailabilitySlot {
        DriverAvailabilitySlot {
            driver_id,
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            origin_zone: self.origin_zone,
            destination_zone: self.destination_zone,
            vehicle_type: self.vehicle_type,
        }
    }
}

/// A driver's answer to a scheduled offer.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct RespondScheduledOfferRequest {
    /// `true` to take the booking.
    pub accept: bool,
}
