//! Token bucket with lazy, greedy refill.

use std::time::Instant;

use crate::config::Quota;

/// Slack for fractional refill accounting.
const EPSILON: f64 = 1e-9;

/// A token bucket for one key.
///
/// Holds only the mutable counters; capacity and refill rate come from the
/// quota passed on each acquisition so a reloaded quota applies immediately.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(quota: &Quota, now: Instant) -> Self {
        Self {
            tokens: quota.capacity.max(0) as f64,
            last_refill: now,
        }
    }

    /// Refill from elapsed time, then take `permits` tokens if all are
    /// available. Takes nothing on rejection.
    pub fn try_acquire(&mut self, quota: &Quota, permits: u32, now: Instant) -> bool {
        self.refill(quota, now);

        let wanted = f64::from(permits);
        if quota.capacity <= 0 || self.tokens + EPSILON < wanted {
            return false;
        }
        self.tokens = (self.tokens - wanted).max(0.0);
        true
    }

    /// Tokens currently available (after refill at `now`).
    pub fn available(&mut self, quota: &Quota, now: Instant) -> f64 {
        self.refill(quota, now);
        self.tokens
    }

    pub fn last_access(&self) -> Instant {
        self.last_refill
    }

    fn refill(&mut self, quota: &Quota, now: Instant) {
        let capacity = quota.capacity.max(0) as f64;
        let interval = quota.refill_interval().as_secs_f64();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        if quota.refill_tokens > 0 && interval > 0.0 {
            self.tokens += elapsed / interval * quota.refill_tokens as f64;
        }
        // Also clamps a count left over from a larger, older quota.
        self.tokens = self.tokens.clamp(0.0, capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quota(capacity: i64, refill: i64, interval_ms: u64) -> Quota {
        Quota {
            capacity,
            refill_tokens: refill,
            refill_interval_ms: interval_ms,
        }
    }

    #[test]
    fn capacity_then_reject() {
        let q = quota(3, 3, 1000);
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&q, now);

        assert!(bucket.try_acquire(&q, 1, now));
        assert!(bucket.try_acquire(&q, 1, now));
        assert!(bucket.try_acquire(&q, 1, now));
        assert!(!bucket.try_acquire(&q, 1, now));
    }

    #[test]
    fn refills_after_one_interval() {
        let q = quota(2, 2, 1000);
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&q, start);
        assert!(bucket.try_acquire(&q, 2, start));
        assert!(!bucket.try_acquire(&q, 1, start));

        let later = start + Duration::from_secs(1);
        assert!(bucket.try_acquire(&q, 1, later));
        assert!(bucket.try_acquire(&q, 1, later));
        assert!(!bucket.try_acquire(&q, 1, later));
    }

    #[test]
    fn fractional_refill_accumulates() {
        let q = quota(1, 1, 900);
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&q, start);
        assert!(bucket.try_acquire(&q, 1, start));

        let mut now = start;
        for _ in 0..2 {
            now += Duration::from_millis(300);
            assert!(!bucket.try_acquire(&q, 1, now));
        }
        now += Duration::from_millis(300);
        assert!(bucket.try_acquire(&q, 1, now));
    }

    #[test]
    fn never_exceeds_capacity() {
        let q = quota(5, 5, 100);
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&q, start);

        assert_eq!(bucket.available(&q, start + Duration::from_secs(60)), 5.0);
    }

    #[test]
    fn non_positive_capacity_always_rejects() {
        let now = Instant::now();
        for capacity in [0, -5] {
            let q = quota(capacity, 10, 1000);
            let mut bucket = TokenBucket::new(&q, now);
            assert!(!bucket.try_acquire(&q, 1, now + Duration::from_secs(10)));
            assert_eq!(bucket.available(&q, now), 0.0);
        }
    }

    #[test]
    fn shrink_clamps_instead_of_bursting() {
        let big = quota(100, 100, 1000);
        let small = quota(2, 2, 1000);
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&big, now);

        assert!(bucket.try_acquire(&small, 1, now));
        assert!(bucket.try_acquire(&small, 1, now));
        assert!(!bucket.try_acquire(&small, 1, now));
    }

    #[test]
    fn multi_token_cost_is_all_or_nothing() {
        let q = quota(5, 5, 1000);
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&q, now);

        assert!(bucket.try_acquire(&q, 3, now));
        assert!(!bucket.try_acquire(&q, 3, now));
        assert_eq!(bucket.available(&q, now), 2.0);
    }

    #[test]
    fn zero_refill_never_refills() {
        let q = quota(1, 0, 1000);
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&q, now);

        assert!(bucket.try_acquire(&q, 1, now));
        assert!(!bucket.try_acquire(&q, 1, now + Duration::from_secs(3600)));
    }
}
