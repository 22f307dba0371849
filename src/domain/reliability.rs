//! Driver reliability as a pure function of trip-outcome history.
//!
//! The score is never mutated in place: [`compute_score`] folds the full
//! history each time, so replaying the same history always yields the same
//! score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ids::{DriverId, ScheduledTripId};
use crate::config::ReliabilityPolicy;

/// How punctual a driver was on one scheduled trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Punctuality {
    /// Within the grace period.
    OnTime,
    /// Late by `minutes`.
    Late {
        /// Minutes past the scheduled time.
        minutes: i64,
    },
    /// Never showed up.
    NoShow,
}

/// One entry of a driver's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReliabilityEvent {
    /// A scheduled offer was sent to the driver.
    OfferExtended {
        /// Booking offered.
        scheduled_trip_id: ScheduledTripId,
        /// When.
        at: DateTime<Utc>,
    },
    /// The driver accepted a scheduled offer.
    OfferAccepted {
        /// Booking accepted.
        scheduled_trip_id: ScheduledTripId,
        /// When.
        at: DateTime<Utc>,
    },
    /// A scheduled trip the driver held was resolved.
    TripResolved {
        /// Booking resolved.
        scheduled_trip_id: ScheduledTripId,
        /// Driver punctuality on that trip.
        punctuality: Punctuality,
        /// When.
        at: DateTime<Utc>,
    },
}

/// Derived reliability of one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReliabilityScore {
    /// Driver.
    pub driver_id: DriverId,
    /// Accepted over extended offers, in percent.
    pub acceptance_rate: f64,
    /// Mean per-trip punctuality, in percent.
    pub punctuality_score: f64,
    /// Trips the driver actually drove.
    pub completed_trips: u32,
    /// Scheduled trips resolved while held by the driver.
    pub total_scheduled_trips: u32,
    /// Weighted combination of acceptance and punctuality.
    pub reliability_score: f64,
    /// Driver is excluded from scheduled work.
    pub is_scheduling_blocked: bool,
}

fn punctuality_points(punctuality: Punctuality, policy: &ReliabilityPolicy) -> f64 {
    match punctuality {
        Punctuality::OnTime => 100.0,
        Punctuality::Late { minutes } => {
            (100.0 - minutes as f64 * policy.late_penalty_per_minute).max(0.0)
        }
        Punctuality::NoShow => 0.0,
    }
}

/// Weighted reliability score from its two components.
#[must_use]
pub fn weighted_score(acceptance_rate: f64, punctuality_score: f64, policy: &ReliabilityPolicy) -> f64 {
    let total = policy.acceptance_weight + policy.punctuality_weight;
    if total <= 0.0 {
        return 100.0;
    }
    (policy.acceptance_weight * acceptance_rate + policy.punctuality_weight * punctuality_score)
        / total
}

/// Folds a driver's full history into a [`ReliabilityScore`].
///
/// Drivers without history score 100 on both components.
#[must_use]
pub fn compute_score(
    driver_id: DriverId,
    history: &[ReliabilityEvent],
    policy: &ReliabilityPolicy,
) -> ReliabilityScore {
    let mut extended = 0_u32;
    let mut accepted = 0_u32;
    let mut resolved = 0_u32;
    let mut completed = 0_u32;
    let mut punctuality_sum = 0.0_f64;

    for event in history {
        match event {
            ReliabilityEvent::OfferExtended { .. } => extended += 1,
            ReliabilityEvent::OfferAccepted { .. } => accepted += 1,
            ReliabilityEvent::TripResolved { punctuality, .. } => {
                resolved += 1;
                if *punctuality != Punctuality::NoShow {
                    completed += 1;
                }
                punctuality_sum += punctuality_points(*punctuality, policy);
            }
        }
    }

    let acceptance_rate = if extended == 0 {
        100.0
    } else {
        (f64::from(accepted) / f64::from(extended) * 100.0).min(100.0)
    };
    let punctuality_score = if resolved == 0 {
        100.0
    } else {
        punctuality_sum / f64::from(resolved)
    };
    let reliability_score = weighted_score(acceptance_rate, punctuality_score, policy);

    ReliabilityScore {
        driver_id,
        acceptance_rate,
        punctuality_score,
        completed_trips: completed,
        total_scheduled_trips: resolved,
        reliability_score,
        is_scheduling_blocked: reliability_score < policy.block_threshold,
    }
}
