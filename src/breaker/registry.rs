//! Keyed circuit breakers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::breaker::machine::{Acquire, CircuitBreaker, Denial, Recorded, Ticket};
use crate::breaker::state::{CircuitState, Transition};
use crate::classify::Outcome;
use crate::clock::SharedClock;
use crate::config::{BreakerThresholds, RegistryConfig};
use crate::key::CallKey;
use crate::observability::EventDispatcher;
use crate::registry::{sweep_map, Sweepable};

/// Admission granted by the breaker.
///
/// Holds the key's breaker alive, so the sweeper cannot evict it while the
/// call is outstanding. A permit dropped without
/// [`CircuitBreakerRegistry::complete`] records an ignored outcome, which
/// frees its in-flight slot (and probe slot) without touching the window.
#[must_use = "dropping a breaker permit records the call as ignored"]
#[derive(Debug)]
pub struct BreakerPermit {
    key: CallKey,
    breaker: Arc<CircuitBreaker>,
    clock: SharedClock,
    ticket: Ticket,
    probe: bool,
    recorded: bool,
}

impl BreakerPermit {
    pub fn key(&self) -> &CallKey {
        &self.key
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.recorded {
            let now = self.clock.now();
            let _ = self
                .breaker
                .record(self.ticket, Outcome::Ignored, Duration::ZERO, now);
        }
    }
}

/// Why the breaker turned a call away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    pub state: CircuitState,
    pub denial: Denial,
}

#[derive(Debug)]
pub enum BreakerAdmission {
    Admitted(BreakerPermit),
    Rejected(BreakerRejection),
}

/// Map of key to circuit breaker.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<CallKey, Arc<CircuitBreaker>>,
    clock: SharedClock,
    events: EventDispatcher,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: SharedClock, events: EventDispatcher) -> Self {
        Self {
            breakers: DashMap::new(),
            clock,
            events,
        }
    }

    pub fn try_acquire(&self, key: &CallKey, thresholds: &BreakerThresholds) -> BreakerAdmission {
        let now = self.clock.now();
        let breaker = self.breaker(key, thresholds, now);
        let (acquire, transition) = breaker.try_acquire(thresholds, now);
        self.emit(key, transition);

        match acquire {
            Acquire::Admitted { ticket, probe } => BreakerAdmission::Admitted(BreakerPermit {
                key: key.clone(),
                breaker,
                clock: Arc::clone(&self.clock),
                ticket,
                probe,
                recorded: false,
            }),
            Acquire::Rejected { state, denial } => {
                tracing::debug!(key = %key, %state, ?denial, "Circuit breaker rejected call");
                BreakerAdmission::Rejected(BreakerRejection { state, denial })
            }
        }
    }

    /// Record the outcome for a permit. Consumes it, so each admission
    /// reports once.
    pub fn complete(&self, mut permit: BreakerPermit, outcome: Outcome, elapsed: Duration) -> Recorded {
        permit.recorded = true;
        self.apply(&permit.key, &permit.breaker, permit.ticket, outcome, elapsed)
    }

    /// Record an outcome by key and ticket. Replays, stale tickets and
    /// tickets for evicted keys are discarded.
    pub fn record_outcome(
        &self,
        key: &CallKey,
        ticket: Ticket,
        outcome: Outcome,
        elapsed: Duration,
    ) -> Recorded {
        let Some(breaker) = self.breakers.get(key).map(|e| Arc::clone(e.value())) else {
            return Recorded::Discarded;
        };
        self.apply(key, &breaker, ticket, outcome, elapsed)
    }

    /// Current state of `key`, if it has a breaker.
    pub fn state(&self, key: &CallKey) -> Option<CircuitState> {
        let breaker = self.breakers.get(key).map(|e| Arc::clone(e.value()))?;
        Some(breaker.state())
    }

    /// The breaker for `key`, if one exists.
    pub fn get(&self, key: &CallKey) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|e| Arc::clone(e.value()))
    }

    fn apply(
        &self,
        key: &CallKey,
        breaker: &CircuitBreaker,
        ticket: Ticket,
        outcome: Outcome,
        elapsed: Duration,
    ) -> Recorded {
        let (recorded, transition) = breaker.record(ticket, outcome, elapsed, self.clock.now());
        if recorded == Recorded::Discarded {
            tracing::debug!(key = %key, %outcome, epoch = ticket.epoch(), "Discarded stale outcome");
        }
        self.emit(key, transition);
        recorded
    }

    fn emit(&self, key: &CallKey, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            self.events.state_transition(key, from, to);
        }
    }

    fn breaker(&self, key: &CallKey, thresholds: &BreakerThresholds, now: Instant) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(key.clone())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(thresholds.clone(), now)))
                .value(),
        )
    }
}

impl Sweepable for CircuitBreakerRegistry {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn len(&self) -> usize {
        self.breakers.len()
    }

    fn sweep(&self, now: Instant, config: &RegistryConfig) -> usize {
        sweep_map(&self.breakers, now, config.idle_eviction(), config.max_keys)
    }
}
