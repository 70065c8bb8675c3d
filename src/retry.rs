//! Retry policy and the time-ordered queue of pending redeliveries.
//!
//! The policy computes exponential backoff with an upper cap and optional
//! jitter; the queue holds `(delivery_id, execute_at)` pairs in a min-heap
//! drained by the background processor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retry delay policy: `min(initial_delay * multiplier^(n-1), max_delay)`
/// for attempt `n`, optionally multiplied by a uniform jitter factor in
/// [0.5, 1.0] to avoid synchronized retry storms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a custom initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Create a policy with a custom multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Create a policy with a custom delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after attempt `attempt_number` (1-based) fails, before
    /// attempt `attempt_number + 1` runs.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(63);
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped = raw.min(self.max_delay_ms as f64);

        let final_ms = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };

        Duration::from_millis(final_ms.round() as u64)
    }

    /// Absolute timestamp for the next retry of attempt `attempt_number`.
    #[must_use]
    pub fn next_retry_at(&self, attempt_number: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt_number);
        now + chrono::Duration::milliseconds(delay.as_millis() as i64)
    }
}

/// A pending redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub execute_at: DateTime<Utc>,
    pub delivery_id: Uuid,
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.execute_at
            .cmp(&other.execute_at)
            .then_with(|| self.delivery_id.cmp(&other.delivery_id))
    }
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Time-ordered queue of pending redeliveries.
///
/// `Reverse` turns the max-heap into a min-heap so the earliest
/// `execute_at` is always at the top.
#[derive(Default)]
pub struct RetryQueue {
    inner: Mutex<BinaryHeap<Reverse<ScheduledRetry>>>,
}

impl RetryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a delivery for re-execution at `execute_at`.
    pub fn schedule(&self, delivery_id: Uuid, execute_at: DateTime<Utc>) {
        let mut heap = self.inner.lock().expect("retry queue poisoned");
        heap.push(Reverse(ScheduledRetry {
            execute_at,
            delivery_id,
        }));
    }

    /// Pop every entry whose `execute_at` has passed, earliest first.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut heap = self.inner.lock().expect("retry queue poisoned");
        let mut due = Vec::new();
        while let Some(Reverse(next)) = heap.peek() {
            if next.execute_at > now {
                break;
            }
            let Reverse(entry) = heap.pop().expect("peeked entry present");
            due.push(entry.delivery_id);
        }
        due
    }

    /// Number of pending redeliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("retry queue poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::default().with_jitter(false)
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay_ms, 60_000);
        assert!(policy.jitter);
    }

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8_000));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = no_jitter();
        // 1000 * 2^9 = 512000ms, over the 60000ms cap
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(60_000));
        // Very large attempt numbers must not overflow
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_delays_non_decreasing() {
        let policy = no_jitter();
        let mut last = Duration::ZERO;
        for n in 1..=12 {
            let delay = policy.delay_for_attempt(n);
            assert!(delay >= last, "delay shrank at attempt {n}");
            last = delay;
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default()
            .with_initial_delay_ms(10_000)
            .with_jitter(true);

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1).as_millis() as u64;
            assert!((5_000..=10_000).contains(&delay), "jittered delay {delay} out of range");
        }
    }

    #[test]
    fn test_next_retry_at_advances_clock() {
        let policy = no_jitter().with_initial_delay_ms(500);
        let now = Utc::now();
        let at = policy.next_retry_at(1, now);
        assert_eq!((at - now).num_milliseconds(), 500);
    }

    #[test]
    fn test_queue_orders_by_execute_at() {
        let queue = RetryQueue::new();
        let now = Utc::now();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        queue.schedule(a, now + chrono::Duration::milliseconds(300));
        queue.schedule(b, now + chrono::Duration::milliseconds(100));
        queue.schedule(c, now + chrono::Duration::milliseconds(200));

        let due = queue.pop_due(now + chrono::Duration::seconds(1));
        assert_eq!(due, vec![b, c, a]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_leaves_future_entries() {
        let queue = RetryQueue::new();
        let now = Utc::now();
        let due_id = Uuid::new_v4();
        let future_id = Uuid::new_v4();

        queue.schedule(due_id, now - chrono::Duration::milliseconds(10));
        queue.schedule(future_id, now + chrono::Duration::seconds(60));

        assert_eq!(queue.pop_due(now), vec![due_id]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_pop_due_empty() {
        let queue = RetryQueue::new();
        assert!(queue.pop_due(Utc::now()).is_empty());
    }
}
