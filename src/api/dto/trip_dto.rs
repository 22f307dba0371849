//! DTOs for trip, presence and offer endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{AuditEntry, CancelledBy, GeoPoint, PresenceValidation};

/// Positions used for a presence check. Missing ones are read from the
/// latest reported samples.
#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
pub struct PositionsRequest {
    /// Driver position.
    #[serde(default)]
    pub driver: Option<GeoPoint>,
    /// Rider position.
    #[serde(default)]
    pub rider: Option<GeoPoint>,
}

/// Progress report from the vehicle.
#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
pub struct AdvanceTripRequest {
    /// Vehicle position; the latest sample when absent.
    #[serde(default)]
    pub position: Option<GeoPoint>,
}

/// Who is cancelling a trip.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct CancelTripRequest {
    /// Party cancelling.
    pub cancelled_by: CancelledBy,
}

/// Presence state of a trip for UI rendering.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PresenceView {
    /// Current validation.
    pub validation: PresenceValidation,
    /// Seconds left on the client-wait timer, while it runs.
    pub seconds_remaining: Option<u64>,
    /// Full audit log, oldest first.
    pub audit_log: Vec<AuditEntry>,
}
