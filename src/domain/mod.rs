//! Domain layer: entities, state machines, and the event system.
//!
//! This module holds the dispatch model: typed identifiers, geo utility,
//! ride requests and match offers, the vehicle seat model, the trip and
//! presence state machines, wallets and holds, scheduled bookings, the pure
//! reliability function, the event bus, and the per-entity locked registry.

pub mod clock;
pub mod dispatch_event;
pub mod event_bus;
pub mod geo;
pub mod ids;
pub mod offer;
pub mod presence;
pub mod registry;
pub mod reliability;
pub mod ride_request;
pub mod scheduling;
pub mod trip;
pub mod vehicle;
pub mod wallet;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use dispatch_event::DispatchEvent;
pub use event_bus::EventBus;
pub use geo::{GeoPoint, Place};
pub use ids::{
    DriverId, HoldId, OfferId, RequestId, RiderId, ScheduledOfferId, ScheduledTripId, TripId,
    VehicleId, WalletId,
};
pub use offer::{MatchOffer, OfferStatus};
pub use presence::{
    AuditAction, AuditEntry, CancellationPolicy, PresenceResolution, PresenceState,
    PresenceValidation,
};
pub use registry::Registry;
pub use reliability::{Punctuality, ReliabilityEvent, ReliabilityScore};
pub use ride_request::{
    FallbackReason, PaymentMethod, PrivateQuote, RequestStatus, RideMode, RideRequest,
    SeatPreference,
};
pub use scheduling::{
    DayOfWeek, DriverAvailabilitySlot, ScheduledOffer, ScheduledOfferStatus, ScheduledResolution,
    ScheduledTrip, ScheduledTripStatus,
};
pub use trip::{CancelledBy, Settlement, StageTimestamp, Trip, TripStatus};
pub use vehicle::{SeatAssignment, VehiclePosition, VehicleState, VehicleStatus, VehicleType};
pub use wallet::{HoldReason, HoldStatus, Wallet, WalletHold};
