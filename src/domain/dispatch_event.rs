//! Domain events reflecting dispatch state mutations.
//!
//! Every state change emits a [`DispatchEvent`] through the
//! [`super::EventBus`]. Events are broadcast to WebSocket subscribers and
//! optionally appended to the PostgreSQL event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{
    DriverId, HoldId, OfferId, RequestId, RiderId, ScheduledTripId, TripId, VehicleId, WalletId,
};
use super::offer::OfferStatus;
use super::presence::AuditEntry;
use super::ride_request::{FallbackReason, RequestStatus};
use super::scheduling::ScheduledTripStatus;
use super::trip::TripStatus;
use super::vehicle::VehicleStatus;
use super::wallet::HoldStatus;

/// Domain event emitted after every state mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A shared search started or restarted.
    RequestOpened {
        /// Request.
        request_id: RequestId,
        /// Rider.
        rider_id: RiderId,
        /// Search deadline.
        expires_at: DateTime<Utc>,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A match offer was extended to a driver.
    OfferProposed {
        /// Offer.
        offer_id: OfferId,
        /// Request served.
        request_id: RequestId,
        /// Vehicle asked.
        vehicle_id: VehicleId,
        /// Driver asked.
        driver_id: DriverId,
        /// Added travel time.
        detour_minutes: f64,
        /// Fare the rider would pay.
        shared_fare: u64,
        /// End of the answer window.
        expires_at: DateTime<Utc>,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A match offer left `pending`.
    OfferResolved {
        /// Offer.
        offer_id: OfferId,
        /// Request served.
        request_id: RequestId,
        /// Vehicle asked.
        vehicle_id: VehicleId,
        /// Final status.
        status: OfferStatus,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A shared search gave up and a private quote was produced.
    RequestFellBack {
        /// Request.
        request_id: RequestId,
        /// Rider.
        rider_id: RiderId,
        /// Why the search failed.
        reason: FallbackReason,
        /// Private dispatch price.
        vtc_price: u64,
        /// Quote deadline.
        valid_until: DateTime<Utc>,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A request reached `matched`, `expired` or `cancelled`.
    RequestClosed {
        /// Request.
        request_id: RequestId,
        /// Rider.
        rider_id: RiderId,
        /// Final status.
        status: RequestStatus,
        /// Trip created, for matched requests.
        trip_id: Option<TripId>,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A vehicle's availability or occupancy changed.
    VehicleUpdated {
        /// Vehicle.
        vehicle_id: VehicleId,
        /// Driver.
        driver_id: DriverId,
        /// Availability.
        status: VehicleStatus,
        /// Passengers on board or booked.
        current_passengers: u32,
        /// Seats.
        capacity: u32,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A trip was created or moved to another stage.
    TripStatusChanged {
        /// Trip.
        trip_id: TripId,
        /// Rider.
        rider_id: RiderId,
        /// Driver.
        driver_id: DriverId,
        /// Previous stage, `None` on creation.
        from: Option<TripStatus>,
        /// New stage.
        to: TripStatus,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// An entry was appended to a trip's presence audit log.
    PresenceAudit {
        /// The appended entry.
        entry: AuditEntry,
    },

    /// A wallet hold was placed, released or captured.
    HoldChanged {
        /// Hold.
        hold_id: HoldId,
        /// Wallet.
        wallet_id: WalletId,
        /// Trip the hold backs.
        trip_id: Option<TripId>,
        /// New status.
        status: HoldStatus,
        /// Held amount.
        amount: u64,
        /// Captured amount, for captured holds.
        captured_amount: Option<u64>,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A driver's reliability score was recomputed.
    ReliabilityUpdated {
        /// Driver.
        driver_id: DriverId,
        /// New score.
        reliability_score: f64,
        /// Whether scheduled work is now blocked.
        is_scheduling_blocked: bool,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A scheduled booking changed status.
    ScheduledTripUpdated {
        /// Booking.
        scheduled_trip_id: ScheduledTripId,
        /// Rider.
        rider_id: RiderId,
        /// Driver holding the booking.
        driver_id: Option<DriverId>,
        /// New status.
        status: ScheduledTripStatus,
        /// Event time.
        timestamp: DateTime<Utc>,
    },

    /// A message for a rider or driver app.
    Notification {
        /// Rider or driver id.
        recipient_id: uuid::Uuid,
        /// Message kind (e.g. `"match_offer"`).
        kind: String,
        /// Message body.
        payload: serde_json::Value,
        /// Event time.
        timestamp: DateTime<Utc>,
    },
}

impl DispatchEvent {
    /// Primary entity the event is keyed by in the event log.
    #[must_use]
    pub fn entity_id(&self) -> uuid::Uuid {
        match self {
            Self::RequestOpened { request_id, .. }
            | Self::RequestFellBack { request_id, .. }
            | Self::RequestClosed { request_id, .. } => *request_id.as_uuid(),
            Self::OfferProposed { offer_id, .. } | Self::OfferResolved { offer_id, .. } => {
                *offer_id.as_uuid()
            }
            Self::VehicleUpdated { vehicle_id, .. } => *vehicle_id.as_uuid(),
            Self::TripStatusChanged { trip_id, .. } => *trip_id.as_uuid(),
            Self::PresenceAudit { entry } => *entry.trip_id.as_uuid(),
            Self::HoldChanged { hold_id, .. } => *hold_id.as_uuid(),
            Self::ReliabilityUpdated { driver_id, .. } => *driver_id.as_uuid(),
            Self::ScheduledTripUpdated {
                scheduled_trip_id, ..
            } => *scheduled_trip_id.as_uuid(),
            Self::Notification { recipient_id, .. } => *recipient_id,
        }
    }

    /// Every entity the event concerns, primary id first.
    ///
    /// WebSocket subscriptions match against this list, so a client watching
    /// a request also sees the offers made for it.
    #[must_use]
    pub fn related_ids(&self) -> Vec<uuid::Uuid> {
        let mut ids = vec![self.entity_id()];
        match self {
            Self::RequestOpened { rider_id, .. }
            | Self::RequestFellBack { rider_id, .. } => ids.push(*rider_id.as_uuid()),
            Self::RequestClosed {
                rider_id, trip_id, ..
            } => {
                ids.push(*rider_id.as_uuid());
                ids.extend(trip_id.map(uuid::Uuid::from));
            }
            Self::OfferProposed {
                request_id,
                vehicle_id,
                driver_id,
                ..
            } => {
                ids.push(*request_id.as_uuid());
                ids.push(*vehicle_id.as_uuid());
                ids.push(*driver_id.as_uuid());
            }
            Self::OfferResolved {
                request_id,
                vehicle_id,
                ..
            } => {
                ids.push(*request_id.as_uuid());
                ids.push(*vehicle_id.as_uuid());
            }
            Self::VehicleUpdated { driver_id, .. } => ids.push(*driver_id.as_uuid()),
            Self::TripStatusChanged {
                rider_id,
                driver_id,
                ..
            } => {
                ids.push(*rider_id.as_uuid());
                ids.push(*driver_id.as_uuid());
            }
            Self::HoldChanged {
                wallet_id, trip_id, ..
            } => {
                ids.push(*wallet_id.as_uuid());
                ids.extend(trip_id.map(uuid::Uuid::from));
            }
            Self::ScheduledTripUpdated {
                rider_id,
                driver_id,
                ..
            } => {
                ids.push(*rider_id.as_uuid());
                ids.extend(driver_id.map(uuid::Uuid::from));
            }
            Self::PresenceAudit { .. }
            | Self::ReliabilityUpdated { .. }
            | Self::Notification { .. } => {}
        }
        ids
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::RequestOpened { .. } => "request_opened",
            Self::OfferProposed { .. } => "offer_proposed",
            Self::OfferResolved { .. } => "offer_resolved",
            Self::RequestFellBack { .. } => "request_fell_back",
            Self::RequestClosed { .. } => "request_closed",
            Self::VehicleUpdated { .. } => "vehicle_updated",
            Self::TripStatusChanged { .. } => "trip_status_changed",
            Self::PresenceAudit { .. } => "presence_audit",
            Self::HoldChanged { .. } => "hold_changed",
            Self::ReliabilityUpdated { .. } => "reliability_updated",
            Self::ScheduledTripUpdated { .. } => "scheduled_trip_updated",
            Self::Notification { .. } => "notification",
        }
    }

    /// Time the event happened.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PresenceAudit { entry } => entry.timestamp,
            Self::RequestOpened { timestamp, .. }
            | Self::OfferProposed { timestamp, .. }
            | Self::OfferResolved { timestamp, .. }
            | Self::RequestFellBack { timestamp, .. }
            | Self::RequestClosed { timestamp, .. }
            | Self::VehicleUpdated { timestamp, .. }
            | Self::TripStatusChanged { timestamp, .. }
            | Self::HoldChanged { timestamp, .. }
            | Self::ReliabilityUpdated { timestamp, .. }
            | Self::ScheduledTripUpdated { timestamp, .. }
            | Self::Notification { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_proposed_reaches_request_and_driver_watchers() {
        let request_id = RequestId::new();
        let driver_id = DriverId::new();
        let event = DispatchEvent::OfferProposed {
            offer_id: OfferId::new(),
            request_id,
            vehicle_id: VehicleId::new(),
            driver_id,
            detour_minutes: 4.0,
            shared_fare: 2100,
            expires_at: Utc::now(),
            timestamp: Utc::now(),
        };
        let ids = event.related_ids();
        assert!(ids.contains(request_id.as_uuid()));
        assert!(ids.contains(driver_id.as_uuid()));
        assert_eq!(event.event_type_str(), "offer_proposed");
    }

    #[test]
    fn trip_event_serializes_with_tag() {
        let trip_id = TripId::new();
        let event = DispatchEvent::TripStatusChanged {
            trip_id,
            rider_id: RiderId::new(),
            driver_id: DriverId::new(),
            from: Some(TripStatus::Waiting),
            to: TripStatus::Onboard,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("\"event_type\":\"trip_status_changed\""));
        assert!(json.contains("\"to\":\"onboard\""));
        assert_eq!(event.entity_id(), *trip_id.as_uuid());
    }
}
