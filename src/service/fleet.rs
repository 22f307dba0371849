//! Fleet operations: vehicle registration, positions, and seat accounting.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::collaborators::PositionCache;
use crate::domain::{
    DispatchEvent, DriverId, EventBus, GeoPoint, Place, Registry, RideMode, SeatAssignment,
    SharedClock, VehicleId, VehiclePosition, VehicleState, VehicleStatus, VehicleType,
};
use crate::error::DispatchError;

/// Data needed to put a vehicle on the road.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewVehicle {
    /// Driver operating the vehicle.
    pub driver_id: DriverId,
    /// Starting position.
    pub position: VehiclePosition,
    /// Passenger seats, driver excluded.
    pub capacity: u32,
    /// Shared or private work.
    pub ride_mode: RideMode,
    /// Where the vehicle is heading, if anywhere.
    #[serde(default)]
    pub destination: Option<Place>,
    /// Category.
    #[serde(default = "default_vehicle_type")]
    pub vehicle_type: VehicleType,
}

const fn default_vehicle_type() -> VehicleType {
    VehicleType::Standard
}

/// Owns every vehicle's state.
#[derive(Debug)]
pub struct FleetManager {
    vehicles: Registry<VehicleId, VehicleState>,
    positions: Arc<PositionCache>,
    event_bus: EventBus,
    clock: SharedClock,
}

impl FleetManager {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new(positions: Arc<PositionCache>, event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            vehicles: Registry::new("vehicle"),
            positions,
            event_bus,
            clock,
        }
    }

    fn vehicle_event(&self, v: &VehicleState) -> DispatchEvent {
        DispatchEvent::VehicleUpdated {
            vehicle_id: v.id,
            driver_id: v.driver_id,
            status: v.status,
            current_passengers: v.current_passengers,
            capacity: v.capacity,
            timestamp: self.clock.now(),
        }
    }

    /// Registers a vehicle as available.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for zero capacity, a
    /// scheduled ride mode, or an invalid position.
    pub async fn register(&self, new: NewVehicle) -> Result<VehicleState, DispatchError> {
        if new.capacity == 0 {
            return Err(DispatchError::InvalidRequest(
                "capacity must be at least 1".to_string(),
            ));
        }
        if new.ride_mode == RideMode::Scheduled {
            return Err(DispatchError::InvalidRequest(
                "vehicles run in shared or private mode".to_string(),
            ));
        }
        let point = new.position.point();
        let vehicle = VehicleState {
            id: VehicleId::new(),
            driver_id: new.driver_id,
            position: new.position,
            capacity: new.capacity,
            current_passengers: 0,
            ride_mode: new.ride_mode,
            destination: new.destination,
            status: VehicleStatus::Available,
            vehicle_type: new.vehicle_type,
            front_seat_taken: false,
            back_row_reserved: false,
            updated_at: self.clock.now(),
        };
        self.positions.report(*vehicle.driver_id.as_uuid(), point).await?;
        self.vehicles.insert(vehicle.id, vehicle.clone()).await?;

        self.event_bus.publish(self.vehicle_event(&vehicle));
        tracing::info!(vehicle_id = %vehicle.id, driver_id = %vehicle.driver_id, capacity = vehicle.capacity, "vehicle registered");
        Ok(vehicle)
    }

    /// Returns a copy of a vehicle.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown vehicle.
    pub async fn vehicle(&self, vehicle_id: VehicleId) -> Result<VehicleState, DispatchError> {
        self.vehicles.snapshot(vehicle_id).await
    }

    /// The vehicle behind its own lock.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown vehicle.
    pub async fn lock(&self, vehicle_id: VehicleId) -> Result<Arc<RwLock<VehicleState>>, DispatchError> {
        self.vehicles.get(vehicle_id).await
    }

    /// Copies of every vehicle.
    pub async fn list(&self) -> Vec<VehicleState> {
        self.vehicles.snapshot_where(|_| true).await
    }

    /// The vehicle a driver operates, if any.
    pub async fn vehicle_of_driver(&self, driver_id: DriverId) -> Option<VehicleState> {
        self.vehicles
            .snapshot_where(|v| v.driver_id == driver_id)
            .await
            .into_iter()
            .next()
    }

    /// Records a new vehicle position and feeds the driver's geolocation.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for an invalid position.
    pub async fn update_position(
        &self,
        vehicle_id: VehicleId,
        position: VehiclePosition,
    ) -> Result<VehicleState, DispatchError> {
        let lock = self.vehicles.get(vehicle_id).await?;
        let mut vehicle = lock.write().await;
        self.positions
            .report(*vehicle.driver_id.as_uuid(), position.point())
            .await?;
        vehicle.position = position;
        vehicle.updated_at = self.clock.now();
        tracing::debug!(%vehicle_id, lat = position.lat, lng = position.lng, "vehicle moved");
        Ok(vehicle.clone())
    }

    /// Changes availability, ride mode or destination.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Conflict`] when taking a vehicle with
    /// passengers offline.
    pub async fn update_status(
        &self,
        vehicle_id: VehicleId,
        status: Option<VehicleStatus>,
        ride_mode: Option<RideMode>,
        destination: Option<Option<Place>>,
    ) -> Result<VehicleState, DispatchError> {
        let lock = self.vehicles.get(vehicle_id).await?;
        let mut vehicle = lock.write().await;
        if status == Some(VehicleStatus::Offline) && vehicle.current_passengers > 0 {
            return Err(DispatchError::Conflict(format!(
                "vehicle {vehicle_id} still carries {} passengers",
                vehicle.current_passengers
            )));
        }
        if ride_mode == Some(RideMode::Scheduled) {
            return Err(DispatchError::InvalidRequest(
                "vehicles run in shared or private mode".to_string(),
            ));
        }
        if let Some(status) = status {
            vehicle.status = status;
        }
        if let Some(mode) = ride_mode {
            vehicle.ride_mode = mode;
        }
        if let Some(destination) = destination {
            vehicle.destination = destination;
        }
        vehicle.updated_at = self.clock.now();
        let snapshot = vehicle.clone();
        drop(vehicle);

        self.event_bus.publish(self.vehicle_event(&snapshot));
        tracing::info!(%vehicle_id, status = ?snapshot.status, mode = ?snapshot.ride_mode, "vehicle updated");
        Ok(snapshot)
    }

    /// Overrides the passenger count for pickups made outside the core.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] if the count is out of range.
    pub async fn set_passengers(
        &self,
        vehicle_id: VehicleId,
        count: u32,
    ) -> Result<VehicleState, DispatchError> {
        let lock = self.vehicles.get(vehicle_id).await?;
        let mut vehicle = lock.write().await;
        vehicle.set_passengers(count)?;
        vehicle.status = if count > 0 {
            VehicleStatus::Busy
        } else if vehicle.status == VehicleStatus::Busy {
            VehicleStatus::Available
        } else {
            vehicle.status
        };
        vehicle.updated_at = self.clock.now();
        let snapshot = vehicle.clone();
        drop(vehicle);

        self.event_bus.publish(self.vehicle_event(&snapshot));
        tracing::info!(%vehicle_id, count, "passenger count set");
        Ok(snapshot)
    }

    /// Frees a seat taken by a finished or cancelled trip.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown vehicle.
    pub async fn release_seat(
        &self,
        vehicle_id: VehicleId,
        seat: SeatAssignment,
    ) -> Result<VehicleState, DispatchError> {
        let lock = self.vehicles.get(vehicle_id).await?;
        let mut vehicle = lock.write().await;
        vehicle.release(seat);
        if vehicle.current_passengers == 0 && vehicle.status == VehicleStatus::Busy {
            vehicle.status = VehicleStatus::Available;
        }
        vehicle.updated_at = self.clock.now();
        let snapshot = vehicle.clone();
        drop(vehicle);

        self.event_bus.publish(self.vehicle_event(&snapshot));
        tracing::info!(%vehicle_id, ?seat, passengers = snapshot.current_passengers, "seat released");
        Ok(snapshot)
    }

    /// Event for a vehicle mutated by another component under its lock.
    #[must_use]
    pub fn updated_event(&self, vehicle: &VehicleState) -> DispatchEvent {
        self.vehicle_event(vehicle)
    }

    /// Latest position of a vehicle.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] for an unknown vehicle.
    pub async fn position(&self, vehicle_id: VehicleId) -> Result<GeoPoint, DispatchError> {
        Ok(self.vehicle(vehicle_id).await?.position.point())
    }
}
