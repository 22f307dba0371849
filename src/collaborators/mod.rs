//! External collaborators consumed by the dispatch core.
//!
//! The core only talks to routing, notification delivery and location
//! sampling through the traits in this module. Each trait ships with an
//! in-process default so the service runs without any external system.

pub mod eta;
pub mod geolocation;
pub mod notifier;

pub use eta::{EtaOracle, HaversineEtaOracle, VehicleRoute};
pub use geolocation::{GeolocationSource, PositionCache};
pub use notifier::{BusNotifier, Notifier};
