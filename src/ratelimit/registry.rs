//! Keyed token buckets.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::config::{Quota, RegistryConfig};
use crate::key::CallKey;
use crate::ratelimit::bucket::TokenBucket;
use crate::registry::{sweep_map, Sweepable, Tracked};

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

/// One key's bucket behind its own lock.
#[derive(Debug)]
pub struct KeyedBucket(Mutex<TokenBucket>);

impl Tracked for KeyedBucket {
    fn last_access(&self) -> Instant {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_access()
    }
}

/// Map of key to token bucket. Buckets are created full on first access.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    buckets: DashMap<CallKey, Arc<KeyedBucket>>,
    clock: SharedClock,
}

impl RateLimiterRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Take `permits` tokens from `key`'s bucket under `quota`.
    ///
    /// Never blocks on I/O; contention is limited to callers of the same key.
    pub fn try_acquire(&self, key: &CallKey, quota: &Quota, permits: u32) -> Admission {
        let now = self.clock.now();
        let entry = self.bucket(key, quota, now);

        let mut bucket = match entry.0.lock() {
            Ok(bucket) => bucket,
            Err(poisoned) => {
                tracing::warn!(key = %key, "Rate limiter state poisoned, resetting bucket");
                let mut bucket = poisoned.into_inner();
                *bucket = TokenBucket::new(quota, now);
                entry.0.clear_poison();
                bucket
            }
        };

        if bucket.try_acquire(quota, permits, now) {
            Admission::Admitted
        } else {
            Admission::Rejected
        }
    }

    /// Tokens currently available for `key`, if it has a bucket.
    pub fn available(&self, key: &CallKey, quota: &Quota) -> Option<f64> {
        let entry = self.buckets.get(key).map(|e| Arc::clone(e.value()))?;
        let mut bucket = entry.0.lock().unwrap_or_else(PoisonError::into_inner);
        Some(bucket.available(quota, self.clock.now()))
    }

    pub fn contains(&self, key: &CallKey) -> bool {
        self.buckets.contains_key(key)
    }

    fn bucket(&self, key: &CallKey, quota: &Quota, now: Instant) -> Arc<KeyedBucket> {
        if let Some(existing) = self.buckets.get(key) {
            return Arc::clone(existing.value());
        }
        // Concurrent first access converges on whichever insert wins.
        Arc::clone(
            self.buckets
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeyedBucket(Mutex::new(TokenBucket::new(quota, now)))))
                .value(),
        )
    }
}

impl Sweepable for RateLimiterRegistry {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn sweep(&self, now: Instant, config: &RegistryConfig) -> usize {
        sweep_map(&self.buckets, now, config.idle_eviction(), config.max_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::time::Duration;

    fn registry() -> (RateLimiterRegistry, ManualClock) {
        let clock = ManualClock::new();
        (RateLimiterRegistry::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn keys_are_independent() {
        let (registry, _) = registry();
        let quota = Quota::per_interval(1, Duration::from_secs(1));
        let a = CallKey::new("a");
        let b = CallKey::new("b");

        assert!(registry.try_acquire(&a, &quota, 1).is_admitted());
        assert_eq!(registry.try_acquire(&a, &quota, 1), Admission::Rejected);
        assert!(registry.try_acquire(&b, &quota, 1).is_admitted());
    }

    #[test]
    fn refill_follows_the_clock() {
        let (registry, clock) = registry();
        let quota = Quota::per_interval(2, Duration::from_secs(1));
        let key = CallKey::new("k");

        assert!(registry.try_acquire(&key, &quota, 2).is_admitted());
        assert_eq!(registry.try_acquire(&key, &quota, 1), Admission::Rejected);

        clock.advance(Duration::from_secs(1));
        assert!(registry.try_acquire(&key, &quota, 1).is_admitted());
        assert_eq!(registry.available(&key, &quota), Some(1.0));
    }

    #[test]
    fn sweep_evicts_idle_buckets() {
        let (registry, clock) = registry();
        let quota = Quota::default();
        registry.try_acquire(&CallKey::new("idle"), &quota, 1);

        clock.advance(Duration::from_secs(7200));
        registry.try_acquire(&CallKey::new("busy"), &quota, 1);

        let removed = registry.sweep(clock.now(), &RegistryConfig::default());
        assert_eq!(removed, 1);
        assert!(!registry.contains(&CallKey::new("idle")));
        assert!(registry.contains(&CallKey::new("busy")));
    }

    #[test]
    fn concurrent_first_access_shares_one_bucket() {
        let registry = Arc::new(RateLimiterRegistry::new(crate::clock::system()));
        let quota = Quota::per_interval(50, Duration::from_secs(3600));
        let key = CallKey::new("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| registry.try_acquire(&key, &quota, 1).is_admitted())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(registry.len(), 1);
    }
}
