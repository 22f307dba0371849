//! # ride-dispatch
//!
//! Dispatch core for a shared ride-hailing service, served over REST and
//! WebSocket.
//!
//! A rider's search is scored against vehicles already on the road, offered
//! to one driver at a time and, when nothing fits, turned into a private
//! quote. Accepted offers become trips that walk through pickup (with a
//! geofenced client-wait timer and an append-only presence audit log),
//! boarding and drop-off. Money is reserved through escrow holds on rider
//! wallets and settled when the trip ends. Scheduled bookings are
//! distributed to drivers by availability slot and feed a per-driver
//! reliability score.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── WS Handler (ws/)
//!     │
//!     ├── DispatchService (service/)
//!     │     ├── CandidateScorer, MatchNegotiator, FallbackDispatcher
//!     │     ├── TripLifecycle, PresenceValidator, EscrowManager
//!     │     ├── SchedulingService, ReliabilityTracker
//!     │     └── DeadlineScheduler (timer loop)
//!     │
//!     ├── EventBus + Registries (domain/)
//!     ├── ETA oracle, geolocation, notifier (collaborators/)
//!     │
//!     └── PostgreSQL event log (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod ws;
