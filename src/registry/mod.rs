//! Per-key state retention shared by both registries.
//!
//! # Responsibilities
//! - Evict keys idle longer than the configured period
//! - Cap the number of live keys, least recently used first
//! - Run the periodic sweep as a background task (sweeper.rs)
//!
//! # Design Decisions
//! - Only entries with no outside reference are evicted; a key with an
//!   outstanding permit survives the sweep
//! - Eviction drops statistics; the next access recreates fresh state
//! - Lock order is shard, then per-key: the sweep reads `last_access` under
//!   the shard lock, while the call path clones the entry out of the map
//!   before locking it, so the reverse order never occurs

pub mod sweeper;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RegistryConfig;
use crate::key::CallKey;

pub use sweeper::{Sweeper, SweeperHandle};

/// Per-key state that remembers when it was last used.
pub trait Tracked: Send + Sync {
    fn last_access(&self) -> Instant;
}

/// A keyed registry the sweeper can trim.
pub trait Sweepable: Send + Sync {
    /// Label used in logs and the `rpc_guard_registry_keys` gauge.
    fn name(&self) -> &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict idle entries and enforce `max_keys`. Returns the number removed.
    fn sweep(&self, now: Instant, config: &RegistryConfig) -> usize;
}

/// Evict idle and surplus entries from `map`.
pub(crate) fn sweep_map<V: Tracked>(
    map: &DashMap<CallKey, Arc<V>>,
    now: Instant,
    idle: Duration,
    max_keys: usize,
) -> usize {
    let mut removed = 0;
    map.retain(|_, state| {
        let keep = Arc::strong_count(state) > 1
            || now.saturating_duration_since(state.last_access()) < idle;
        if !keep {
            removed += 1;
        }
        keep
    });

    let excess = map.len().saturating_sub(max_keys);
    if excess > 0 {
        let mut candidates: Vec<(Instant, CallKey)> = map
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) == 1)
            .map(|entry| (entry.value().last_access(), entry.key().clone()))
            .collect();
        candidates.sort_by_key(|(at, _)| *at);

        for (_, key) in candidates.into_iter().take(excess) {
            if map
                .remove_if(&key, |_, state| Arc::strong_count(state) == 1)
                .is_some()
            {
                removed += 1;
            }
        }
    }

    removed
}
