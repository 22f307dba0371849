//! Presence Validator: pickup geofence, client-wait timer, and the
//! append-only audit log that backs every decision.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use super::timers::{DeadlineScheduler, TimerKey};
use crate::config::PresencePolicy;
use crate::domain::{
    AuditAction, AuditEntry, CancellationPolicy, DispatchEvent, EventBus, GeoPoint,
    PresenceValidation, SharedClock, TripId,
};
use crate::error::DispatchError;

/// Outcome of one geofence check.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PresenceCheck {
    /// Audit action recorded for the check.
    pub action: AuditAction,
    /// Measured distance.
    pub distance_meters: f64,
    /// Validation state after the check.
    pub validation: PresenceValidation,
}

/// Tracks one [`PresenceValidation`] per trip in its pickup stage.
///
/// The live map is a cache; the audit log is the system of record and can
/// rebuild any validation through [`PresenceValidation::replay`].
#[derive(Debug)]
pub struct PresenceValidator {
    live: RwLock<HashMap<TripId, PresenceValidation>>,
    log: RwLock<HashMap<TripId, Vec<AuditEntry>>>,
    policy: PresencePolicy,
    timers: Arc<DeadlineScheduler>,
    event_bus: EventBus,
    clock: SharedClock,
}

impl PresenceValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(
        policy: PresencePolicy,
        timers: Arc<DeadlineScheduler>,
        event_bus: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            log: RwLock::new(HashMap::new()),
            policy,
            timers,
            event_bus,
            clock,
        }
    }

    /// Geofence parameters.
    #[must_use]
    pub fn policy(&self) -> &PresencePolicy {
        &self.policy
    }

    #[allow(clippy::too_many_arguments)]
    async fn append(
        &self,
        live: &mut HashMap<TripId, PresenceValidation>,
        trip_id: TripId,
        action: AuditAction,
        driver_pos: Option<GeoPoint>,
        rider_pos: Option<GeoPoint>,
        distance_meters: Option<f64>,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> PresenceValidation {
        let mut log = self.log.write().await;
        let entries = log.entry(trip_id).or_default();
        let entry = AuditEntry {
            sequence: u64::try_from(entries.len()).unwrap_or(u64::MAX).saturating_add(1),
            trip_id,
            action_type: action,
            driver_pos,
            rider_pos,
            distance_meters,
            timestamp: at,
            metadata,
        };
        let validation = live
            .entry(trip_id)
            .or_insert_with(|| PresenceValidation::new(trip_id, &self.policy));
        validation.apply(&entry);
        let snapshot = validation.clone();
        entries.push(entry.clone());
        drop(log);

        self.event_bus.publish(DispatchEvent::PresenceAudit { entry });
        tracing::info!(%trip_id, ?action, ?distance_meters, "presence audit");
        snapshot
    }

    /// Appends `TIMER_EXPIRED` if the timer ran out and nobody recorded it.
    async fn expire_locked(
        &self,
        live: &mut HashMap<TripId, PresenceValidation>,
        trip_id: TripId,
        now: DateTime<Utc>,
    ) {
        let due = live.get(&trip_id).and_then(|v| {
            v.timer_due(now)
                .then(|| v.deadline())
                .flatten()
        });
        if let Some(deadline) = due {
            self.append(
                live,
                trip_id,
                AuditAction::TimerExpired,
                None,
                None,
                None,
                json!({ "deadline": deadline }),
                deadline,
            )
            .await;
        }
    }

    /// Measures the driver-rider distance and records `ZONE_VALIDATED` or
    /// `MOVED_AWAY`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] for an invalid coordinate and
    /// [`DispatchError::AlreadyResolved`] once the pickup stage ended.
    pub async fn check(
        &self,
        trip_id: TripId,
        driver_pos: GeoPoint,
        rider_pos: GeoPoint,
    ) -> Result<PresenceCheck, DispatchError> {
        if !driver_pos.is_valid() || !rider_pos.is_valid() {
            return Err(DispatchError::InvalidRequest(
                "coordinate out of range".to_string(),
            ));
        }
        let now = self.clock.now();
        let mut live = self.live.write().await;
        self.ensure_open(&live, trip_id).await?;
        self.expire_locked(&mut live, trip_id, now).await;

        let distance_meters = driver_pos.distance_meters(&rider_pos);
        let action = live
            .get(&trip_id)
            .map_or_else(
                || PresenceValidation::new(trip_id, &self.policy),
                Clone::clone,
            )
            .classify(distance_meters);
        let validation = self
            .append(
                &mut live,
                trip_id,
                action,
                Some(driver_pos),
                Some(rider_pos),
                Some(distance_meters),
                json!({ "threshold_meters": self.policy.proximity_threshold_meters }),
                now,
            )
            .await;
        Ok(PresenceCheck {
            action,
            distance_meters,
            validation,
        })
    }

    async fn ensure_open(
        &self,
        live: &HashMap<TripId, PresenceValidation>,
        trip_id: TripId,
    ) -> Result<(), DispatchError> {
        let resolved = match live.get(&trip_id) {
            Some(v) => v.is_resolved(),
            None => self.log.read().await.contains_key(&trip_id),
        };
        if resolved {
            return Err(DispatchError::AlreadyResolved(format!(
                "pickup stage of trip {trip_id} already ended"
            )));
        }
        Ok(())
    }

    /// Starts the client-wait timer on the driver's "I've arrived" action.
    ///
    /// Only the first call while in zone starts it; later calls return the
    /// current state unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Conflict`] if the driver is not in zone.
    pub async fn start_timer(&self, trip_id: TripId) -> Result<PresenceValidation, DispatchError> {
        let now = self.clock.now();
        let mut live = self.live.write().await;
        let Some(current) = live.get(&trip_id).cloned() else {
            return Err(DispatchError::Conflict(format!(
                "trip {trip_id} has no position check yet"
            )));
        };
        if current.timer_started_at.is_some() {
            return Ok(current);
        }
        if !current.within_threshold {
            return Err(DispatchError::Conflict(format!(
                "driver of trip {trip_id} is outside the pickup zone"
            )));
        }
        let validation = self
            .append(
                &mut live,
                trip_id,
                AuditAction::TimerStart,
                None,
                None,
                None,
                json!({ "duration_seconds": self.policy.timer_duration_secs }),
                now,
            )
            .await;
        drop(live);

        if let Some(deadline) = validation.deadline() {
            self.timers
                .schedule(TimerKey::PresenceTimer(trip_id), deadline)
                .await;
        }
        Ok(validation)
    }

    /// Records the timer's expiry if it is due.
    ///
    /// Returns `true` if a `TIMER_EXPIRED` entry was appended.
    pub async fn expire_if_due(&self, trip_id: TripId) -> bool {
        let now = self.clock.now();
        let mut live = self.live.write().await;
        let before = live.get(&trip_id).map(|v| v.state);
        self.expire_locked(&mut live, trip_id, now).await;
        before != live.get(&trip_id).map(|v| v.state)
    }

    /// How a cancellation right now would settle the escrow hold.
    ///
    /// An expired client-wait timer releases it; a running timer, a driver
    /// out of zone or a trip without any check captures the penalty. Only a
    /// due `TIMER_EXPIRED` entry is recorded, so asking twice is harmless.
    pub async fn cancellation_policy(&self, trip_id: TripId) -> CancellationPolicy {
        let now = self.clock.now();
        let mut live = self.live.write().await;
        self.expire_locked(&mut live, trip_id, now).await;
        live.get(&trip_id)
            .map_or(CancellationPolicy::Penalty, PresenceValidation::cancellation_policy)
    }

    /// Ends the pickup stage of a cancelled trip once its hold is settled
    /// under `policy`.
    ///
    /// Records `PENALTY_WARNING` or `NO_SHOW` and stops the client-wait
    /// timer. Trips without any check leave no audit entry.
    pub async fn resolve_cancellation(&self, trip_id: TripId, policy: CancellationPolicy) {
        let now = self.clock.now();
        let mut live = self.live.write().await;
        let Some(current) = live.get(&trip_id).cloned() else {
            return;
        };
        if current.is_resolved() {
            return;
        }
        let (action, metadata) = match policy {
            CancellationPolicy::Penalty => (
                AuditAction::PenaltyWarning,
                json!({ "seconds_remaining": current.seconds_remaining(now) }),
            ),
            CancellationPolicy::NoPenalty => (AuditAction::NoShow, json!({})),
        };
        self.append(
            &mut live, trip_id, action, None, None, None, metadata, now,
        )
        .await;
        live.remove(&trip_id);
        drop(live);

        self.timers.cancel(TimerKey::PresenceTimer(trip_id)).await;
    }

    /// Records `CLIENT_CONFIRMED` and closes the pickup stage.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Conflict`] unless the driver is in zone.
    pub async fn confirm_boarding(&self, trip_id: TripId) -> Result<PresenceValidation, DispatchError> {
        let now = self.clock.now();
        let mut live = self.live.write().await;
        self.expire_locked(&mut live, trip_id, now).await;
        let allowed = live
            .get(&trip_id)
            .is_some_and(|v| !v.is_resolved() && v.can_confirm_boarding());
        if !allowed {
            tracing::debug!(%trip_id, "boarding refused outside the pickup zone");
            return Err(DispatchError::Conflict(format!(
                "driver of trip {trip_id} is not in the pickup zone"
            )));
        }
        let validation = self
            .append(
                &mut live,
                trip_id,
                AuditAction::ClientConfirmed,
                None,
                None,
                None,
                json!({}),
                now,
            )
            .await;
        live.remove(&trip_id);
        drop(live);

        self.timers.cancel(TimerKey::PresenceTimer(trip_id)).await;
        Ok(validation)
    }

    /// Current validation: the live one, or the replay of the audit log
    /// once the pickup stage ended.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if the trip never had a check.
    pub async fn projection(&self, trip_id: TripId) -> Result<PresenceValidation, DispatchError> {
        if let Some(v) = self.live.read().await.get(&trip_id) {
            return Ok(v.clone());
        }
        self.replay(trip_id).await
    }

    /// Rebuilds the validation from the audit log alone.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if the trip has no log.
    pub async fn replay(&self, trip_id: TripId) -> Result<PresenceValidation, DispatchError> {
        let log = self.log.read().await;
        let entries = log
            .get(&trip_id)
            .ok_or_else(|| DispatchError::not_found("presence validation", trip_id))?;
        Ok(PresenceValidation::replay(trip_id, &self.policy, entries))
    }

    /// The trip's ordered audit log.
    pub async fn audit_log(&self, trip_id: TripId) -> Vec<AuditEntry> {
        self.log
            .read()
            .await
            .get(&trip_id)
            .cloned()
            .unwrap_or_default()
    }
}
