//! Pickup geofence state and its append-only audit trail.
//!
//! Every change to a [`PresenceValidation`] is expressed as an
//! [`AuditEntry`] and applied through [`PresenceValidation::apply`], so the
//! ordered audit log alone is enough to rebuild the state with
//! [`PresenceValidation::replay`]. Dispute resolution relies on that log.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::geo::GeoPoint;
use super::ids::TripId;
use crate::config::PresencePolicy;

/// Geofence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    /// No position check yet.
    Checking,
    /// Driver within the threshold of the rider.
    InZone,
    /// Driver outside the threshold.
    OutOfZone,
    /// Client-wait timer ran out.
    TimerExpired,
}

/// Kind of audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A check found the driver within the threshold.
    ZoneValidated,
    /// A check found the driver outside the threshold.
    MovedAway,
    /// The client-wait timer started.
    TimerStart,
    /// The client-wait timer ran out.
    TimerExpired,
    /// Cancellation while the timer was still running.
    PenaltyWarning,
    /// Cancellation after the timer ran out.
    NoShow,
    /// The client boarded.
    ClientConfirmed,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    /// Position in the trip's log, starting at 1.
    pub sequence: u64,
    /// Trip the entry belongs to.
    pub trip_id: TripId,
    /// What happened.
    pub action_type: AuditAction,
    /// Driver position at the time, if known.
    pub driver_pos: Option<GeoPoint>,
    /// Rider position at the time, if known.
    pub rider_pos: Option<GeoPoint>,
    /// Driver-rider distance, if known.
    pub distance_meters: Option<f64>,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Free-form context (threshold, seconds remaining, ...).
    pub metadata: serde_json::Value,
}

/// How a pickup-stage cancellation must settle the escrow hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Capture the hold.
    Penalty,
    /// Release the hold.
    NoPenalty,
}

/// How the pickup stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresenceResolution {
    /// Client boarded.
    Boarded,
    /// Cancelled with penalty.
    CancelledWithPenalty,
    /// Cancelled without penalty.
    CancelledNoPenalty,
}

/// Live geofence state for the pickup stage of one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresenceValidation {
    /// Trip under validation.
    pub trip_id: TripId,
    /// Geofence radius.
    pub proximity_threshold_meters: f64,
    /// Client-wait timer length.
    pub timer_duration_seconds: u64,
    /// Current state.
    pub state: PresenceState,
    /// When the client-wait timer started.
    pub timer_started_at: Option<DateTime<Utc>>,
    /// Whether the last check was within the threshold.
    pub within_threshold: bool,
    /// Last driver position checked.
    pub last_driver_pos: Option<GeoPoint>,
    /// Last rider position checked.
    pub last_rider_pos: Option<GeoPoint>,
    /// Last measured distance.
    pub last_distance_meters: Option<f64>,
    /// How the pickup stage ended, once it did.
    pub resolution: Option<PresenceResolution>,
}

impl PresenceValidation {
    /// Creates a validation in `checking`.
    #[must_use]
    pub fn new(trip_id: TripId, policy: &PresencePolicy) -> Self {
        Self {
            trip_id,
            proximity_threshold_meters: policy.proximity_threshold_meters,
            timer_duration_seconds: policy.timer_duration_secs,
            state: PresenceState::Checking,
            timer_started_at: None,
            within_threshold: false,
            last_driver_pos: None,
            last_rider_pos: None,
            last_distance_meters: None,
            resolution: None,
        }
    }

    /// Rebuilds a validation from its ordered audit log.
    #[must_use]
    pub fn replay(trip_id: TripId, policy: &PresencePolicy, entries: &[AuditEntry]) -> Self {
        let mut validation = Self::new(trip_id, policy);
        for entry in entries {
            validation.apply(entry);
        }
        validation
    }

    /// Applies one audit entry.
    pub fn apply(&mut self, entry: &AuditEntry) {
        if entry.driver_pos.is_some() {
            self.last_driver_pos = entry.driver_pos;
        }
        if entry.rider_pos.is_some() {
            self.last_rider_pos = entry.rider_pos;
        }
        if entry.distance_meters.is_some() {
            self.last_distance_meters = entry.distance_meters;
        }
        match entry.action_type {
            AuditAction::ZoneValidated => {
                self.within_threshold = true;
                if self.state != PresenceState::TimerExpired {
                    self.state = PresenceState::InZone;
                }
            }
            AuditAction::MovedAway => {
                self.within_threshold = false;
                if self.state != PresenceState::TimerExpired {
                    self.state = PresenceState::OutOfZone;
                }
            }
            AuditAction::TimerStart => self.timer_started_at = Some(entry.timestamp),
            AuditAction::TimerExpired => self.state = PresenceState::TimerExpired,
            AuditAction::PenaltyWarning => {
                self.resolution = Some(PresenceResolution::CancelledWithPenalty);
            }
            AuditAction::NoShow => self.resolution = Some(PresenceResolution::CancelledNoPenalty),
            AuditAction::ClientConfirmed => self.resolution = Some(PresenceResolution::Boarded),
        }
    }

    /// Classifies a measured distance against the threshold.
    #[must_use]
    pub fn classify(&self, distance_meters: f64) -> AuditAction {
        if distance_meters <= self.proximity_threshold_meters {
            AuditAction::ZoneValidated
        } else {
            AuditAction::MovedAway
        }
    }

    /// Instant the client-wait timer runs out, if it started.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.timer_duration_seconds).unwrap_or(i64::MAX);
        self.timer_started_at
            .map(|start| start + Duration::seconds(secs))
    }

    /// Whole seconds left on the timer; `None` before it starts.
    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.deadline()
            .map(|deadline| u64::try_from((deadline - now).num_seconds()).unwrap_or(0))
    }

    /// Returns `true` if the timer is running and its deadline has passed
    /// but no `TIMER_EXPIRED` entry was applied yet.
    #[must_use]
    pub fn timer_due(&self, now: DateTime<Utc>) -> bool {
        self.state != PresenceState::TimerExpired
            && self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Returns `true` once the pickup stage ended.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Returns `true` if the driver may confirm the client aboard.
    #[must_use]
    pub fn can_confirm_boarding(&self) -> bool {
        self.within_threshold
            && matches!(
                self.state,
                PresenceState::InZone | PresenceState::TimerExpired
            )
    }

    /// Settlement for a cancellation right now.
    ///
    /// Only an expired client-wait timer waives the penalty.
    #[must_use]
    pub fn cancellation_policy(&self) -> CancellationPolicy {
        if self.state == PresenceState::TimerExpired {
            CancellationPolicy::NoPenalty
        } else {
            CancellationPolicy::Penalty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::offset_north;

    fn entry(seq: u64, trip_id: TripId, action: AuditAction, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            sequence: seq,
            trip_id,
            action_type: action,
            driver_pos: None,
            rider_pos: None,
            distance_meters: None,
            timestamp: at,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn classify_uses_inclusive_threshold() {
        let v = PresenceValidation::new(TripId::new(), &PresencePolicy::default());
        assert_eq!(v.classify(50.0), AuditAction::ZoneValidated);
        assert_eq!(v.classify(50.1), AuditAction::MovedAway);
        assert_eq!(v.classify(30.0), AuditAction::ZoneValidated);
    }

    #[test]
    fn timer_counts_down_and_expires() {
        let trip_id = TripId::new();
        let start = Utc::now();
        let mut v = PresenceValidation::new(trip_id, &PresencePolicy::default());
        v.apply(&entry(1, trip_id, AuditAction::ZoneValidated, start));
        v.apply(&entry(2, trip_id, AuditAction::TimerStart, start));
        assert_eq!(v.seconds_remaining(start), Some(120));
        assert_eq!(v.seconds_remaining(start + Duration::seconds(45)), Some(75));
        assert!(!v.timer_due(start + Duration::seconds(119)));
        assert!(v.timer_due(start + Duration::seconds(120)));
        assert_eq!(v.cancellation_policy(), CancellationPolicy::Penalty);

        v.apply(&entry(3, trip_id, AuditAction::TimerExpired, start));
        assert_eq!(v.state, PresenceState::TimerExpired);
        assert_eq!(v.cancellation_policy(), CancellationPolicy::NoPenalty);
    }

    #[test]
    fn expired_state_survives_later_checks() {
        let trip_id = TripId::new();
        let now = Utc::now();
        let mut v = PresenceValidation::new(trip_id, &PresencePolicy::default());
        v.apply(&entry(1, trip_id, AuditAction::TimerExpired, now));
        v.apply(&entry(2, trip_id, AuditAction::MovedAway, now));
        assert_eq!(v.state, PresenceState::TimerExpired);
        assert!(!v.can_confirm_boarding());
        v.apply(&entry(3, trip_id, AuditAction::ZoneValidated, now));
        assert!(v.can_confirm_boarding());
    }

    #[test]
    fn replay_matches_incremental_application() {
        let trip_id = TripId::new();
        let policy = PresencePolicy::default();
        let now = Utc::now();
        let rider = GeoPoint::new(14.6928, -17.4467);
        let mut log = Vec::new();
        let mut first = entry(1, trip_id, AuditAction::MovedAway, now);
        first.driver_pos = Some(offset_north(rider, 80.0));
        first.rider_pos = Some(rider);
        first.distance_meters = Some(80.0);
        log.push(first);
        log.push(entry(2, trip_id, AuditAction::ZoneValidated, now));
        log.push(entry(3, trip_id, AuditAction::TimerStart, now));
        log.push(entry(4, trip_id, AuditAction::ClientConfirmed, now));

        let mut live = PresenceValidation::new(trip_id, &policy);
        for e in &log {
            live.apply(e);
        }
        let replayed = PresenceValidation::replay(trip_id, &policy, &log);
        assert_eq!(live, replayed);
        assert_eq!(replayed.resolution, Some(PresenceResolution::Boarded));
        assert_eq!(replayed.last_distance_meters, Some(80.0));
    }
}
