//! Type-safe entity identifiers.
//!
//! Every entity id is a newtype wrapper around [`uuid::Uuid`] (v4) so that a
//! trip id can never be passed where a vehicle id is expected. All ids
//! serialize transparently as UUID strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a rider's shared-ride search.
    RequestId
);
entity_id!(
    /// Identifier of a vehicle tracked by the dispatcher.
    VehicleId
);
entity_id!(
    /// Identifier of a match offer extended to a driver.
    OfferId
);
entity_id!(
    /// Identifier of a confirmed trip.
    TripId
);
entity_id!(
    /// Identifier of an escrow hold.
    HoldId
);
entity_id!(
    /// Identifier of a rider or driver wallet.
    WalletId
);
entity_id!(
    /// Identifier of a driver.
    DriverId
);
entity_id!(
    /// Identifier of a rider.
    RiderId
);
entity_id!(
    /// Identifier of a trip booked ahead of time.
    ScheduledTripId
);
entity_id!(
    /// Identifier of a scheduled-trip offer sent to one driver.
    ScheduledOfferId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(TripId::new(), TripId::new());
    }

    #[test]
    fn display_is_uuid_format() {
        let s = format!("{}", VehicleId::new());
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let id = OfferId::from_uuid(uuid);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn ordering_follows_uuid() {
        let a = TripId::from_uuid(uuid::Uuid::from_u128(1));
        let b = TripId::from_uuid(uuid::Uuid::from_u128(2));
        assert!(a < b);
        assert_eq!(*a.as_uuid(), uuid::Uuid::from_u128(1));
    }
}
