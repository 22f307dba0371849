//! Service layer: dispatch logic orchestration.
//!
//! [`DispatchService`] is the entry point. It owns one instance of each
//! component service and performs the automatic steps between them:
//! re-scoring after a failed offer, fallback to a private quote, deadline
//! handling and scheduled-trip settlement. Every mutation in the layer
//! follows the same pattern: lock the entity, mutate, release, publish a
//! [`crate::domain::DispatchEvent`], log.

pub mod dispatch;
pub mod escrow;
pub mod fallback;
pub mod fleet;
pub mod negotiator;
pub mod presence;
pub mod pricing;
pub mod reliability;
pub mod scheduling;
pub mod scorer;
pub mod timers;
pub mod trips;

pub use dispatch::{DispatchService, NewSearch, SearchOutcome};
pub use escrow::EscrowManager;
pub use fallback::FallbackDispatcher;
pub use fleet::{FleetManager, NewVehicle};
pub use negotiator::{AcceptOutcome, MatchNegotiator};
pub use presence::{PresenceCheck, PresenceValidator};
pub use reliability::ReliabilityTracker;
pub use scheduling::{NewBooking, SchedulingService};
pub use scorer::{Candidate, CandidateScorer, Scoring};
pub use timers::{DeadlineScheduler, TimerKey};
pub use trips::{ArrivalReport, NewTrip, TripLifecycle};

/// Whole seconds as a chrono duration, saturating for absurd settings.
pub(crate) fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::from(u32::MAX)))
}
