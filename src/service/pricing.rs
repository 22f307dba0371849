//! Fare formulas.
//!
//! Amounts are in the wallet's smallest currency unit. Distances are the
//! great-circle length of the rider's own journey.

use crate::config::FareSchedule;
use crate::domain::{SeatPreference, VehicleType};

fn to_amount(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// `base + km × rate`, before any reduction or surcharge.
#[must_use]
pub fn distance_fare(schedule: &FareSchedule, distance_km: f64) -> f64 {
    schedule.base_fare as f64 + distance_km.max(0.0) * schedule.per_km_rate as f64
}

/// Surcharge for the requested seat.
#[must_use]
pub const fn seat_surcharge(schedule: &FareSchedule, pref: SeatPreference) -> u64 {
    match pref {
        SeatPreference::Any => 0,
        SeatPreference::Front => schedule.front_seat_surcharge,
        SeatPreference::BackAlone => schedule.back_alone_surcharge,
    }
}

/// Fare a rider pays to join a vehicle carrying `current` of `capacity`
/// passengers: the distance fare reduced pro rata by occupancy, plus the
/// seat surcharge.
#[must_use]
pub fn shared_fare(
    schedule: &FareSchedule,
    distance_km: f64,
    current: u32,
    capacity: u32,
    pref: SeatPreference,
) -> u64 {
    let occupancy = if capacity == 0 {
        0.0
    } else {
        f64::from(current.min(capacity)) / f64::from(capacity)
    };
    let reduction = 1.0 - schedule.occupancy_discount.clamp(0.0, 1.0) * occupancy;
    to_amount(distance_fare(schedule, distance_km) * reduction) + seat_surcharge(schedule, pref)
}

/// Fare without the occupancy reduction.
#[must_use]
pub fn original_fare(schedule: &FareSchedule, distance_km: f64, pref: SeatPreference) -> u64 {
    to_amount(distance_fare(schedule, distance_km)) + seat_surcharge(schedule, pref)
}

/// Private dispatch price: `(shared_equivalent, vtc_price)`.
#[must_use]
pub fn private_quote(schedule: &FareSchedule, distance_km: f64) -> (u64, u64) {
    let shared_equivalent = to_amount(distance_fare(schedule, distance_km));
    let vtc = to_amount(shared_equivalent as f64 * schedule.private_markup.max(1.0));
    (shared_equivalent, vtc)
}

/// Estimated fare of a scheduled booking.
#[must_use]
pub fn scheduled_estimate(schedule: &FareSchedule, distance_km: f64, vehicle_type: VehicleType) -> u64 {
    to_amount(distance_fare(schedule, distance_km) * vehicle_type.fare_multiplier())
}

/// `percent` of `amount`, rounded.
#[must_use]
pub fn percent_of(amount: u64, percent: u64) -> u64 {
    to_amount(amount as f64 * percent as f64 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_seat_in_empty_vehicle_at_three_km() {
        let fares = FareSchedule::default();
        assert_eq!(shared_fare(&fares, 3.0, 0, 3, SeatPreference::Front), 2100);
        assert_eq!(original_fare(&fares, 3.0, SeatPreference::Front), 2100);
    }

    #[test]
    fn occupancy_reduces_distance_part_only() {
        let fares = FareSchedule::default();
        // 1600 × (1 − 0.25 × 2/4) = 1400, surcharge untouched
        assert_eq!(shared_fare(&fares, 3.0, 2, 4, SeatPreference::BackAlone), 2400);
        assert_eq!(shared_fare(&fares, 3.0, 2, 4, SeatPreference::Any), 1400);
    }

    #[test]
    fn private_quote_applies_markup() {
        let fares = FareSchedule::default();
        assert_eq!(private_quote(&fares, 3.0), (1600, 2400));
    }

    #[test]
    fn scheduled_estimate_uses_vehicle_multiplier() {
        let fares = FareSchedule::default();
        assert_eq!(scheduled_estimate(&fares, 10.0, VehicleType::Van), 4500);
        assert_eq!(percent_of(4500, 20), 900);
    }
}
