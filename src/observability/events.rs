//! Guard event hooks.
//!
//! # Responsibilities
//! - Define the sink interface for rejections, transitions and outcomes
//! - Fan events out to every installed sink
//!
//! # Design Decisions
//! - Sinks are fire-and-forget; a panicking sink is contained and logged,
//!   never propagated into the call path
//! - Events are emitted after per-key locks are released

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashSet;

use crate::breaker::CircuitState;
use crate::classify::Outcome;
use crate::error::RejectReason;
use crate::key::CallKey;

/// Receiver of guard events. Every method defaults to a no-op.
pub trait GuardEvents: Send + Sync {
    fn on_rejected(&self, _key: &CallKey, _reason: RejectReason) {}

    fn on_state_transition(&self, _key: &CallKey, _from: CircuitState, _to: CircuitState) {}

    fn on_outcome(&self, _key: &CallKey, _outcome: Outcome) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl GuardEvents for TracingEvents {
    fn on_rejected(&self, key: &CallKey, reason: RejectReason) {
        tracing::debug!(key = %key, tenant = key.tenant(), %reason, "Call rejected");
    }

    fn on_state_transition(&self, key: &CallKey, from: CircuitState, to: CircuitState) {
        tracing::info!(key = %key, %from, %to, "Circuit breaker state changed");
    }

    fn on_outcome(&self, key: &CallKey, outcome: Outcome) {
        tracing::trace!(key = %key, %outcome, "Call outcome");
    }
}

/// Distinct tenant label values [`MetricsEvents`] keeps by default.
pub const DEFAULT_TENANT_LABELS: usize = 100;

/// Label for tenants past the limit.
pub const OVERFLOW_TENANT: &str = "other";

/// Records events through the `metrics` facade.
///
/// The tenant label comes from caller-supplied metadata, so only the first
/// `max_tenants` distinct values get their own series; later ones are
/// reported as [`OVERFLOW_TENANT`].
#[derive(Debug)]
pub struct MetricsEvents {
    tenants: DashSet<String>,
    max_tenants: usize,
}

impl MetricsEvents {
    pub fn new() -> Self {
        Self::with_tenant_limit(DEFAULT_TENANT_LABELS)
    }

    pub fn with_tenant_limit(max_tenants: usize) -> Self {
        Self {
            tenants: DashSet::new(),
            max_tenants,
        }
    }

    fn tenant_label<'a>(&self, tenant: &'a str) -> &'a str {
        if self.tenants.contains(tenant) {
            return tenant;
        }
        if self.tenants.len() < self.max_tenants {
            self.tenants.insert(tenant.to_string());
            return tenant;
        }
        OVERFLOW_TENANT
    }
}

impl Default for MetricsEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardEvents for MetricsEvents {
    fn on_rejected(&self, key: &CallKey, reason: RejectReason) {
        let tenant = self.tenant_label(key.tenant());
        crate::observability::metrics::record_rejection(reason, tenant);
    }

    fn on_state_transition(&self, _key: &CallKey, from: CircuitState, to: CircuitState) {
        crate::observability::metrics::record_transition(from, to);
    }

    fn on_outcome(&self, _key: &CallKey, outcome: Outcome) {
        crate::observability::metrics::record_outcome(outcome);
    }
}

/// Clonable fan-out over a fixed set of sinks.
#[derive(Clone)]
pub struct EventDispatcher {
    sinks: Arc<[Arc<dyn GuardEvents>]>,
}

impl EventDispatcher {
    pub fn new(sinks: Vec<Arc<dyn GuardEvents>>) -> Self {
        Self {
            sinks: sinks.into(),
        }
    }

    /// A dispatcher that drops every event.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Tracing and metrics sinks.
    pub fn standard() -> Self {
        let sinks: Vec<Arc<dyn GuardEvents>> = vec![Arc::new(TracingEvents), Arc::new(MetricsEvents::new())];
        Self::new(sinks)
    }

    pub fn rejected(&self, key: &CallKey, reason: RejectReason) {
        self.each("on_rejected", |sink| sink.on_rejected(key, reason));
    }

    pub fn state_transition(&self, key: &CallKey, from: CircuitState, to: CircuitState) {
        self.each("on_state_transition", |sink| {
            sink.on_state_transition(key, from, to)
        });
    }

    pub fn outcome(&self, key: &CallKey, outcome: Outcome) {
        self.each("on_outcome", |sink| sink.on_outcome(key, outcome));
    }

    fn each<F>(&self, hook: &'static str, f: F)
    where
        F: Fn(&dyn GuardEvents),
    {
        for sink in self.sinks.iter() {
            if catch_unwind(AssertUnwindSafe(|| f(sink.as_ref()))).is_err() {
                tracing::warn!(hook, "Event sink panicked");
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl GuardEvents for Counting {
        fn on_rejected(&self, _key: &CallKey, _reason: RejectReason) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl GuardEvents for Panicking {
        fn on_rejected(&self, _key: &CallKey, _reason: RejectReason) {
            panic!("sink failure");
        }
    }

    #[test]
    fn panicking_sink_does_not_stop_others() {
        let counting = Arc::new(Counting::default());
        let sinks: Vec<Arc<dyn GuardEvents>> = vec![Arc::new(Panicking), counting.clone()];
        let dispatcher = EventDispatcher::new(sinks);

        dispatcher.rejected(&CallKey::new("k"), RejectReason::RateLimited);
        dispatcher.rejected(&CallKey::new("k"), RejectReason::CircuitOpen);

        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tenant_labels_are_bounded() {
        let events = MetricsEvents::with_tenant_limit(2);

        assert_eq!(events.tenant_label("acme"), "acme");
        assert_eq!(events.tenant_label("globex"), "globex");
        assert_eq!(events.tenant_label("initech"), OVERFLOW_TENANT);
        assert_eq!(events.tenant_label("acme"), "acme");
        assert_eq!(events.tenants.len(), 2);
    }

    #[test]
    fn default_hooks_are_no_ops() {
        struct Silent;
        impl GuardEvents for Silent {}

        let sinks: Vec<Arc<dyn GuardEvents>> = vec![Arc::new(Silent)];
        let dispatcher = EventDispatcher::new(sinks);
        dispatcher.outcome(&CallKey::new("k"), Outcome::Success);
        dispatcher.state_transition(&CallKey::new("k"), CircuitState::Closed, CircuitState::Open);
    }
}
