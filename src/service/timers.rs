//! Server-owned deadline timers.
//!
//! One [`DeadlineScheduler`] serves the whole core: offer windows, request
//! deadlines, quote validity and presence timers all live in a single
//! min-heap keyed by entity. Cancelling or rescheduling a key bumps its
//! generation, so a stale heap entry is skipped when it surfaces instead of
//! firing a conflicting transition.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{OfferId, RequestId, TripId};

/// What a deadline governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Answer window of a match offer.
    OfferExpiry(OfferId),
    /// Search deadline of an open request.
    RequestExpiry(RequestId),
    /// Validity of a private fallback quote.
    QuoteExpiry(RequestId),
    /// Client-wait timer of a trip's pickup stage.
    PresenceTimer(TripId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledTimer {
    deadline: DateTime<Utc>,
    generation: u64,
    key: TimerKey,
}

impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the earliest deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct TimerQueue {
    heap: BinaryHeap<ScheduledTimer>,
    live: HashMap<TimerKey, u64>,
    next_generation: u64,
}

impl TimerQueue {
    fn drop_stale_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.live.get(&head.key) == Some(&head.generation) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Priority queue of cancellable per-entity deadlines.
#[derive(Debug, Default)]
pub struct DeadlineScheduler {
    queue: Mutex<TimerQueue>,
    wake: Notify,
}

impl DeadlineScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` to fire at `deadline`, replacing any earlier arming.
    pub async fn schedule(&self, key: TimerKey, deadline: DateTime<Utc>) {
        let mut queue = self.queue.lock().await;
        queue.next_generation += 1;
        let generation = queue.next_generation;
        queue.live.insert(key, generation);
        queue.heap.push(ScheduledTimer {
            deadline,
            generation,
            key,
        });
        drop(queue);
        self.wake.notify_one();
        tracing::debug!(?key, %deadline, "timer armed");
    }

    /// Disarms `key`. Returns `true` if it was armed.
    pub async fn cancel(&self, key: TimerKey) -> bool {
        let removed = self.queue.lock().await.live.remove(&key).is_some();
        if removed {
            tracing::debug!(?key, "timer cancelled");
        }
        removed
    }

    /// Returns `true` if `key` is armed.
    pub async fn is_armed(&self, key: TimerKey) -> bool {
        self.queue.lock().await.live.contains_key(&key)
    }

    /// Removes and returns every armed key whose deadline is at or before
    /// `now`, earliest first.
    pub async fn pop_due(&self, now: DateTime<Utc>) -> Vec<TimerKey> {
        let mut queue = self.queue.lock().await;
        let mut due = Vec::new();
        loop {
            queue.drop_stale_head();
            match queue.heap.peek() {
                Some(head) if head.deadline <= now => {}
                _ => break,
            }
            if let Some(timer) = queue.heap.pop() {
                queue.live.remove(&timer.key);
                due.push(timer.key);
            }
        }
        due
    }

    /// Earliest armed deadline.
    pub async fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let mut queue = self.queue.lock().await;
        queue.drop_stale_head();
        queue.heap.peek().map(|t| t.deadline)
    }

    /// Number of armed keys.
    pub async fn armed(&self) -> usize {
        self.queue.lock().await.live.len()
    }

    /// Resolves when a new deadline is armed.
    pub async fn changed(&self) {
        self.wake.notified().await;
    }
}
