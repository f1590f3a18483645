//! Periodic idle-key eviction.
//!
//! # Responsibilities
//! - Periodically sweep every registry
//! - Publish the live key count per registry

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::clock::SharedClock;
use crate::config::SnapshotHandle;
use crate::observability::metrics;
use crate::registry::Sweepable;

pub struct Sweeper {
    registries: Vec<Arc<dyn Sweepable>>,
    snapshot: SnapshotHandle,
    clock: SharedClock,
}

impl Sweeper {
    pub fn new(registries: Vec<Arc<dyn Sweepable>>, snapshot: SnapshotHandle, clock: SharedClock) -> Self {
        Self {
            registries,
            snapshot,
            clock,
        }
    }

    /// Sweep every registry once using the current snapshot's retention
    /// settings. Returns the number of evicted keys.
    pub fn sweep_once(&self) -> usize {
        let snapshot = self.snapshot.load();
        let config = &snapshot.config().registry;
        let now = self.clock.now();

        let mut evicted = 0;
        for registry in &self.registries {
            let removed = registry.sweep(now, config);
            if removed > 0 {
                tracing::info!(registry = registry.name(), removed, "Evicted idle keys");
            }
            metrics::record_registry_size(registry.name(), registry.len());
            evicted += removed;
        }
        evicted
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval = self.snapshot.load().config().registry.sweep_interval();
        tracing::info!(interval_secs = interval.as_secs(), "Registry sweeper starting");

        let mut ticker = time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registry sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> SweeperHandle {
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(rx));
        SweeperHandle { tx, task }
    }
}

/// Stops a spawned [`Sweeper`].
pub struct SweeperHandle {
    tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Registry sweeper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{GuardConfig, Quota};
    use crate::key::CallKey;
    use crate::ratelimit::RateLimiterRegistry;
    use std::time::Duration;

    fn setup() -> (Sweeper, Arc<RateLimiterRegistry>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = Arc::new(RateLimiterRegistry::new(Arc::new(clock.clone())));

        let mut config = GuardConfig::default();
        config.registry.idle_eviction_secs = 10;
        let snapshot = SnapshotHandle::new(config).unwrap();

        let registries: Vec<Arc<dyn Sweepable>> = vec![limiter.clone()];
        let sweeper = Sweeper::new(registries, snapshot, Arc::new(clock.clone()));
        (sweeper, limiter, clock)
    }

    #[test]
    fn sweep_once_uses_snapshot_retention() {
        let (sweeper, limiter, clock) = setup();
        limiter.try_acquire(&CallKey::new("k"), &Quota::default(), 1);

        clock.advance(Duration::from_secs(9));
        assert_eq!(sweeper.sweep_once(), 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(sweeper.sweep_once(), 1);
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let (sweeper, _limiter, _clock) = setup();
        let handle = sweeper.spawn();

        time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("sweeper did not stop");
    }
}
