//! Reliability Tracker: per-driver outcome history and the derived score.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::config::ReliabilityPolicy;
use crate::domain::reliability::compute_score;
use crate::domain::{
    DispatchEvent, DriverId, EventBus, ReliabilityEvent, ReliabilityScore, SharedClock,
};

/// Keeps every driver's append-only history and its latest score.
#[derive(Debug)]
pub struct ReliabilityTracker {
    histories: RwLock<HashMap<DriverId, Vec<ReliabilityEvent>>>,
    scores: RwLock<HashMap<DriverId, ReliabilityScore>>,
    policy: ReliabilityPolicy,
    event_bus: EventBus,
    clock: SharedClock,
}

impl ReliabilityTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(policy: ReliabilityPolicy, event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            scores: RwLock::new(HashMap::new()),
            policy,
            event_bus,
            clock,
        }
    }

    /// Appends an outcome and recomputes the driver's score from the full
    /// history.
    pub async fn record(&self, driver_id: DriverId, event: ReliabilityEvent) -> ReliabilityScore {
        let mut histories = self.histories.write().await;
        let history = histories.entry(driver_id).or_default();
        history.push(event);
        let score = compute_score(driver_id, history, &self.policy);
        drop(histories);

        let previous = self.scores.write().await.insert(driver_id, score.clone());
        let was_blocked = previous.is_some_and(|p| p.is_scheduling_blocked);
        if was_blocked != score.is_scheduling_blocked {
            tracing::info!(
                %driver_id,
                blocked = score.is_scheduling_blocked,
                "scheduling block changed"
            );
        }

        self.event_bus.publish(DispatchEvent::ReliabilityUpdated {
            driver_id,
            reliability_score: score.reliability_score,
            is_scheduling_blocked: score.is_scheduling_blocked,
            timestamp: self.clock.now(),
        });
        tracing::info!(
            %driver_id,
            score = score.reliability_score,
            acceptance = score.acceptance_rate,
            punctuality = score.punctuality_score,
            "reliability recomputed"
        );
        score
    }

    /// Latest score; drivers without history get the neutral score.
    pub async fn score(&self, driver_id: DriverId) -> ReliabilityScore {
        match self.scores.read().await.get(&driver_id) {
            Some(score) => score.clone(),
            None => compute_score(driver_id, &[], &self.policy),
        }
    }

    /// Score recomputed from the stored history alone.
    pub async fn replay(&self, driver_id: DriverId) -> ReliabilityScore {
        let histories = self.histories.read().await;
        let history = histories.get(&driver_id).map(Vec::as_slice).unwrap_or_default();
        compute_score(driver_id, history, &self.policy)
    }

    /// The driver's full history, oldest first.
    pub async fn history(&self, driver_id: DriverId) -> Vec<ReliabilityEvent> {
        self.histories
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns `true` if the driver is excluded from scheduled work.
    pub async fn is_blocked(&self, driver_id: DriverId) -> bool {
        self.scores
            .read()
            .await
            .get(&driver_id)
            .is_some_and(|s| s.is_scheduling_blocked)
    }

    /// Every currently blocked driver.
    pub async fn blocked_drivers(&self) -> HashSet<DriverId> {
        self.scores
            .read()
            .await
            .values()
            .filter(|s| s.is_scheduling_blocked)
            .map(|s| s.driver_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::domain::{Punctuality, ScheduledTripId, SystemClock};

    fn tracker() -> ReliabilityTracker {
        ReliabilityTracker::new(
            ReliabilityPolicy::default(),
            EventBus::new(64),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn no_shows_block_and_good_trips_unblock() {
        let tracker = tracker();
        let driver = DriverId::new();
        let trip = ScheduledTripId::new();
        let now = Utc::now();

        tracker
            .record(driver, ReliabilityEvent::OfferExtended { scheduled_trip_id: trip, at: now })
            .await;
        tracker
            .record(driver, ReliabilityEvent::OfferExtended { scheduled_trip_id: trip, at: now })
            .await;
        tracker
            .record(driver, ReliabilityEvent::OfferAccepted { scheduled_trip_id: trip, at: now })
            .await;
        let score = tracker
            .record(
                driver,
                ReliabilityEvent::TripResolved {
                    scheduled_trip_id: trip,
                    punctuality: Punctuality::NoShow,
                    at: now,
                },
            )
            .await;
        // 0.5 × 50 + 0.5 × 0
        assert!(score.is_scheduling_blocked);
        assert!(tracker.is_blocked(driver).await);
        assert!(tracker.blocked_drivers().await.contains(&driver));

        for _ in 0..3 {
            tracker
                .record(
                    driver,
                    ReliabilityEvent::TripResolved {
                        scheduled_trip_id: ScheduledTripId::new(),
                        punctuality: Punctuality::OnTime,
                        at: now,
                    },
                )
                .await;
        }
        // 0.5 × 50 + 0.5 × 75 = 62.5
        assert!(!tracker.is_blocked(driver).await);
    }

    #[tokio::test]
    async fn replay_matches_incremental_score() {
        let tracker = tracker();
        let driver = DriverId::new();
        let now = Utc::now();
        let trip = ScheduledTripId::new();
        tracker
            .record(driver, ReliabilityEvent::OfferExtended { scheduled_trip_id: trip, at: now })
            .await;
        let live = tracker
            .record(
                driver,
                ReliabilityEvent::TripResolved {
                    scheduled_trip_id: trip,
                    punctuality: Punctuality::Late { minutes: 4 },
                    at: now,
                },
            )
            .await;
        assert_eq!(tracker.replay(driver).await, live);
        assert_eq!(tracker.history(driver).await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_driver_is_not_blocked() {
        let tracker = tracker();
        let driver = DriverId::new();
        assert!(!tracker.is_blocked(driver).await);
        assert!((tracker.score(driver).await.reliability_score - 100.0).abs() < 1e-9);
    }
}
