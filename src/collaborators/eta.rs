//! ETA and detour estimation.

use std::fmt;

use async_trait::async_trait;

use crate::config::EtaPolicy;
use crate::domain::GeoPoint;
use crate::error::DispatchError;

/// Where a vehicle is and where it is heading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleRoute {
    /// Current position.
    pub position: GeoPoint,
    /// Current destination, `None` for an idle vehicle.
    pub destination: Option<GeoPoint>,
}

/// Routing engine contract.
///
/// Implementations may call out to a network service, hence `async`.
#[async_trait]
pub trait EtaOracle: Send + Sync + fmt::Debug {
    /// Minutes added to `route` by picking a rider up at `new_origin` and
    /// dropping them at `new_destination`.
    async fn estimate_detour(
        &self,
        route: &VehicleRoute,
        new_origin: GeoPoint,
        new_destination: GeoPoint,
    ) -> Result<f64, DispatchError>;

    /// Minutes to drive from `from` to `to`.
    async fn estimate_eta(&self, from: GeoPoint, to: GeoPoint) -> Result<f64, DispatchError>;
}

/// Oracle driving along great circles stretched by a road factor at a
/// constant average speed.
#[derive(Debug, Clone)]
pub struct HaversineEtaOracle {
    average_speed_kmh: f64,
    road_factor: f64,
}

impl HaversineEtaOracle {
    /// Creates an oracle from the configured policy.
    #[must_use]
    pub fn new(policy: &EtaPolicy) -> Self {
        Self {
            average_speed_kmh: policy.average_speed_kmh.max(1.0),
            road_factor: policy.road_factor.max(1.0),
        }
    }

    fn minutes(&self, from: GeoPoint, to: GeoPoint) -> f64 {
        from.distance_km(&to) * self.road_factor / self.average_speed_kmh * 60.0
    }

    fn check(point: GeoPoint) -> Result<GeoPoint, DispatchError> {
        if point.is_valid() {
            Ok(point)
        } else {
            Err(DispatchError::EtaUnavailable(format!(
                "coordinate out of range: ({}, {})",
                point.lat, point.lng
            )))
        }
    }
}

#[async_trait]
impl EtaOracle for HaversineEtaOracle {
    async fn estimate_detour(
        &self,
        route: &VehicleRoute,
        new_origin: GeoPoint,
        new_destination: GeoPoint,
    ) -> Result<f64, DispatchError> {
        let position = Self::check(route.position)?;
        let origin = Self::check(new_origin)?;
        let drop = Self::check(new_destination)?;

        let Some(destination) = route.destination else {
            // An idle vehicle only detours to reach the rider.
            return Ok(self.minutes(position, origin));
        };
        let destination = Self::check(destination)?;

        let direct = self.minutes(position, destination);
        let to_pickup = self.minutes(position, origin);
        // Drop the new rider before or after the vehicle's own stop.
        let drop_first =
            to_pickup + self.minutes(origin, drop) + self.minutes(drop, destination);
        let drop_last =
            to_pickup + self.minutes(origin, destination) + self.minutes(destination, drop);
        Ok((drop_first.min(drop_last) - direct).max(0.0))
    }

    async fn estimate_eta(&self, from: GeoPoint, to: GeoPoint) -> Result<f64, DispatchError> {
        Ok(self.minutes(Self::check(from)?, Self::check(to)?))
    }
}
