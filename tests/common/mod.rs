//! Shared utilities for integration tests.

use std::sync::Arc;
use std::time::Duration;

use rpc_guard::clock::ManualClock;
use rpc_guard::config::{BreakerThresholds, Quota};
use rpc_guard::observability::EventDispatcher;
use rpc_guard::{CallStatus, Code, Guard, GuardConfig, SnapshotHandle};

/// Build a guard over `config` driven by a manual clock.
pub fn guard_with(config: GuardConfig) -> (Guard, ManualClock) {
    let clock = ManualClock::new();
    let snapshot = SnapshotHandle::new(config).expect("valid config");
    let guard = Guard::builder(snapshot)
        .clock(Arc::new(clock.clone()))
        .events(EventDispatcher::none())
        .build();
    (guard, clock)
}

/// Config with a generous rate limit and the given breaker thresholds.
pub fn breaker_config(thresholds: BreakerThresholds) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.rate_limit.default = Quota::per_interval(10_000, Duration::from_secs(1));
    config.circuit_breaker.default = thresholds;
    config
}

/// Breaker that opens at a 50% failure rate over a window of `window` calls.
pub fn thresholds(window: usize, cooldown: Duration, probes: usize) -> BreakerThresholds {
    BreakerThresholds {
        failure_rate_threshold: 50.0,
        sliding_window_size: window,
        minimum_number_of_calls: window,
        wait_duration_in_open_state_ms: cooldown.as_millis() as u64,
        permitted_calls_in_half_open: probes,
        success_threshold: 1,
        ..BreakerThresholds::default()
    }
}

/// Terminal status of a failed call.
#[allow(dead_code)]
pub fn failure() -> CallStatus {
    CallStatus::callee(Code::Unavailable)
}
