//! Candidate Scorer: ranks shared vehicles for a ride request.
//!
//! Scoring is a pure read. It never locks or mutates a vehicle; the
//! negotiator re-checks capacity under the vehicle lock when it proposes.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::pricing;
use crate::collaborators::{EtaOracle, VehicleRoute};
use crate::config::{FareSchedule, MatchingPolicy};
use crate::domain::{DriverId, RideRequest, SeatAssignment, VehicleId, VehicleState};
use crate::error::DispatchError;

/// One compatible vehicle with its cost for the rider.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Candidate {
    /// Vehicle.
    pub vehicle_id: VehicleId,
    /// Driver.
    pub driver_id: DriverId,
    /// Seat the rider would get.
    pub seat: SeatAssignment,
    /// Added travel time for the vehicle.
    pub detour_minutes: f64,
    /// Time for the vehicle to reach the rider.
    pub pickup_eta_minutes: f64,
    /// Fare in the shared vehicle.
    pub shared_fare: u64,
    /// Fare before the occupancy reduction.
    pub original_fare: u64,
}

/// Result of one scoring pass.
#[derive(Debug, Clone, Default)]
pub struct Scoring {
    /// Compatible vehicles, best first.
    pub candidates: Vec<Candidate>,
    /// Shared vehicles with a free seat that were considered at all.
    pub considered: usize,
}

/// Ranks shared vehicles by detour, then pickup ETA, then fare.
#[derive(Debug, Clone)]
pub struct CandidateScorer {
    eta: Arc<dyn EtaOracle>,
    matching: MatchingPolicy,
    fares: FareSchedule,
}

impl CandidateScorer {
    /// Creates a scorer.
    #[must_use]
    pub fn new(eta: Arc<dyn EtaOracle>, matching: MatchingPolicy, fares: FareSchedule) -> Self {
        Self {
            eta,
            matching,
            fares,
        }
    }

    /// Scores `vehicles` for `request`.
    ///
    /// Vehicles excluded by the request, driven by a `blocked` driver, whose
    /// destination is farther than the tolerance from the rider's, or whose
    /// detour exceeds the cap are dropped.
    ///
    /// # Errors
    ///
    /// Propagates [`DispatchError::EtaUnavailable`] from the oracle.
    pub async fn score(
        &self,
        request: &RideRequest,
        vehicles: &[VehicleState],
        blocked: &HashSet<DriverId>,
    ) -> Result<Scoring, DispatchError> {
        let origin = request.origin.point();
        let destination = request.destination.point();
        let distance_km = request.distance_km();
        let mut scoring = Scoring::default();

        for vehicle in vehicles.iter().filter(|v| v.is_shared_candidate()) {
            scoring.considered += 1;
            if request.excluded_vehicles.contains(&vehicle.id) || blocked.contains(&vehicle.driver_id)
            {
                continue;
            }
            let Some(seat) = vehicle.seat_for(request.seat_preference) else {
                continue;
            };
            if let Some(vehicle_destination) = &vehicle.destination
                && vehicle_destination.point().distance_km(&destination)
                    > self.matching.destination_tolerance_km
            {
                continue;
            }

            let route = VehicleRoute {
                position: vehicle.position.point(),
                destination: vehicle.destination.as_ref().map(|d| d.point()),
            };
            let detour_minutes = self.eta.estimate_detour(&route, origin, destination).await?;
            if detour_minutes > self.matching.detour_cap_minutes {
                tracing::debug!(vehicle_id = %vehicle.id, detour_minutes, "detour over cap");
                continue;
            }
            let pickup_eta_minutes = self.eta.estimate_eta(route.position, origin).await?;

            scoring.candidates.push(Candidate {
                vehicle_id: vehicle.id,
                driver_id: vehicle.driver_id,
                seat,
                detour_minutes,
                pickup_eta_minutes,
                shared_fare: pricing::shared_fare(
                    &self.fares,
                    distance_km,
                    vehicle.current_passengers,
                    vehicle.capacity,
                    request.seat_preference,
                ),
                original_fare: pricing::original_fare(
                    &self.fares,
                    distance_km,
                    request.seat_preference,
                ),
            });
        }

        scoring.candidates.sort_by(|a, b| {
            a.detour_minutes
                .total_cmp(&b.detour_minutes)
                .then_with(|| a.pickup_eta_minutes.total_cmp(&b.pickup_eta_minutes))
                .then_with(|| a.shared_fare.cmp(&b.shared_fare))
        });
        Ok(scoring)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::collaborators::HaversineEtaOracle;
    use crate::config::EtaPolicy;
    use crate::domain::geo::offset_north;
    use crate::domain::{
        GeoPoint, PaymentMethod, Place, RequestId, RequestStatus, RideMode, RiderId,
        SeatPreference, VehiclePosition, VehicleStatus, VehicleType,
    };

    fn scorer() -> CandidateScorer {
        CandidateScorer::new(
            Arc::new(HaversineEtaOracle::new(&EtaPolicy::default())),
            MatchingPolicy::default(),
            FareSchedule::default(),
        )
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(14.6928, -17.4467)
    }

    fn request(pref: SeatPreference) -> RideRequest {
        let a = origin();
        let b = offset_north(a, 3_000.0);
        let now = Utc::now();
        RideRequest {
            id: RequestId::new(),
            rider_id: RiderId::new(),
            origin: Place::new(a.lat, a.lng, "A"),
            destination: Place::new(b.lat, b.lng, "B"),
            mode: RideMode::Shared,
            seat_preference: pref,
            payment_method: PaymentMethod::Cash,
            wallet_id: None,
            status: RequestStatus::Open,
            created_at: now,
            expires_at: now + Duration::seconds(300),
            rejected_offers: 0,
            excluded_vehicles: Vec::new(),
            fallback_quote: None,
        }
    }

    fn vehicle_at(meters_south: f64) -> VehicleState {
        let p = offset_north(origin(), -meters_south);
        VehicleState {
            id: VehicleId::new(),
            driver_id: DriverId::new(),
            position: VehiclePosition {
                lat: p.lat,
                lng: p.lng,
                heading: 0.0,
            },
            capacity: 3,
            current_passengers: 0,
            ride_mode: RideMode::Shared,
            destination: None,
            status: VehicleStatus::Available,
            vehicle_type: VehicleType::Standard,
            front_seat_taken: false,
            back_row_reserved: false,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ranks_by_detour_and_prices_front_seat() {
        let near = vehicle_at(500.0);
        let far = vehicle_at(1_500.0);
        let Ok(scoring) = scorer()
            .score(&request(SeatPreference::Front), &[far.clone(), near.clone()], &HashSet::new())
            .await
        else {
            panic!("scoring should succeed");
        };
        assert_eq!(scoring.considered, 2);
        assert_eq!(scoring.candidates.len(), 2);
        assert_eq!(scoring.candidates[0].vehicle_id, near.id);
        assert_eq!(scoring.candidates[0].shared_fare, 2100);
        assert_eq!(scoring.candidates[0].seat, SeatAssignment::Front);
    }

    #[tokio::test]
    async fn drops_far_destination_blocked_driver_and_taken_seat() {
        let mut elsewhere = vehicle_at(200.0);
        let far_away = offset_north(origin(), 20_000.0);
        elsewhere.destination = Some(Place::new(far_away.lat, far_away.lng, "far"));

        let blocked_vehicle = vehicle_at(200.0);
        let mut blocked = HashSet::new();
        blocked.insert(blocked_vehicle.driver_id);

        let mut front_taken = vehicle_at(200.0);
        front_taken.front_seat_taken = true;
        front_taken.current_passengers = 1;

        let Ok(scoring) = scorer()
            .score(
                &request(SeatPreference::Front),
                &[elsewhere, blocked_vehicle, front_taken],
                &blocked,
            )
            .await
        else {
            panic!("scoring should succeed");
        };
        assert_eq!(scoring.considered, 3);
        assert!(scoring.candidates.is_empty());
    }

    #[tokio::test]
    async fn detour_over_cap_is_rejected() {
        // 10 km away at 30 km/h with road factor 1.3 is 26 minutes.
        let remote = vehicle_at(10_000.0);
        let Ok(scoring) = scorer()
            .score(&request(SeatPreference::Any), &[remote], &HashSet::new())
            .await
        else {
            panic!("scoring should succeed");
        };
        assert!(scoring.candidates.is_empty());
    }

    #[tokio::test]
    async fn private_and_full_vehicles_are_not_considered() {
        let mut private = vehicle_at(100.0);
        private.ride_mode = RideMode::Private;
        let mut full = vehicle_at(100.0);
        full.current_passengers = 3;
        let Ok(scoring) = scorer()
            .score(&request(SeatPreference::Any), &[private, full], &HashSet::new())
            .await
        else {
            panic!("scoring should succeed");
        };
        assert_eq!(scoring.considered, 0);
    }
}
