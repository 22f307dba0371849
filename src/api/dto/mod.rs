//! Data Transfer Objects for REST request/response serialization.
//!
//! Amounts are integers in the wallet's smallest currency unit. Domain
//! types that already serialize cleanly (trips, offers, holds) are returned
//! as-is; the DTOs here cover request bodies and composite views.

pub mod common_dto;
pub mod fleet_dto;
pub mod scheduling_dto;
pub mod trip_dto;
pub mod wallet_dto;

pub use common_dto::*;
pub use fleet_dto::*;
pub use scheduling_dto::*;
pub use trip_dto::*;
pub use wallet_dto::*;
