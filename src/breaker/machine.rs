//! Per-key circuit breaker state machine.
//!
//! # State Transitions
//! ```text
//! Closed → Open:      window holds enough samples and the failure (or slow
//!                     call) rate reaches its threshold
//! Open → Half-Open:   first acquisition after the cooldown, admitted as a probe
//! Half-Open → Open:   a probe fails, or outlives the probe grace period
//! Half-Open → Closed: enough consecutive probe successes
//! ```
//!
//! Every transition bumps the epoch and forgets outstanding admissions, so a
//! late outcome from an older state is discarded instead of being counted
//! against the new one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::breaker::state::{CircuitState, Transition};
use crate::breaker::window::{Sample, SlidingWindow};
use crate::classify::Outcome;
use crate::config::BreakerThresholds;
use crate::registry::Tracked;

/// Identifies one admission. Recording it twice, or after a transition,
/// has no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    epoch: u64,
    seq: u64,
}

impl Ticket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Why an acquisition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Open and still cooling down.
    Open,
    /// Half-open with every probe permit in use.
    ProbePermitExhausted,
}

/// Result of [`CircuitBreaker::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Admitted { ticket: Ticket, probe: bool },
    Rejected { state: CircuitState, denial: Denial },
}

/// Result of [`CircuitBreaker::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Applied,
    /// Stale epoch or already recorded.
    Discarded,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    probe: bool,
    issued_at: Instant,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: SlidingWindow,
    thresholds: BreakerThresholds,
    transitioned_at: Instant,
    last_access: Instant,
    epoch: u64,
    next_seq: u64,
    in_flight: HashMap<u64, InFlight>,
    probe_successes: usize,
}

impl Inner {
    fn new(thresholds: BreakerThresholds, epoch: u64, now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            window: SlidingWindow::new(thresholds.sliding_window_size),
            thresholds,
            transitioned_at: now,
            last_access: now,
            epoch,
            next_seq: 0,
            in_flight: HashMap::new(),
            probe_successes: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.transitioned_at = now;
        self.epoch += 1;
        self.in_flight.clear();
        self.probe_successes = 0;
        self.window.clear();
        Transition { from, to }
    }

    fn admit(&mut self, probe: bool, now: Instant) -> Acquire {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(seq, InFlight { probe, issued_at: now });
        Acquire::Admitted {
            ticket: Ticket {
                epoch: self.epoch,
                seq,
            },
            probe,
        }
    }

    fn adopt(&mut self, thresholds: &BreakerThresholds) {
        if self.thresholds != *thresholds {
            self.window.resize(thresholds.sliding_window_size);
            self.thresholds = thresholds.clone();
        }
    }

    fn should_trip(&self) -> bool {
        let t = &self.thresholds;
        let required = t.minimum_number_of_calls.min(t.sliding_window_size).max(1);
        self.window.len() >= required
            && (self.window.failure_rate() >= t.failure_rate_threshold
                || self.window.slow_rate() >= t.slow_call_rate_threshold)
    }

    fn probe_overdue(&self, now: Instant) -> bool {
        let grace = self.thresholds.probe_grace();
        self.in_flight
            .values()
            .any(|f| f.probe && now.saturating_duration_since(f.issued_at) >= grace)
    }
}

/// Circuit breaker for one key.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(thresholds: BreakerThresholds, now: Instant) -> Self {
        Self {
            inner: Mutex::new(Inner::new(thresholds, 0, now)),
        }
    }

    /// Ask to admit a call. Cooldown and probe expiry are evaluated here,
    /// lazily, rather than by timers.
    pub fn try_acquire(
        &self,
        thresholds: &BreakerThresholds,
        now: Instant,
    ) -> (Acquire, Option<Transition>) {
        let mut inner = self.lock(now);
        inner.last_access = now;
        inner.adopt(thresholds);

        let state = inner.state;
        match state {
            CircuitState::Closed => (inner.admit(false, now), None),
            CircuitState::Open => {
                let elapsed = now.saturating_duration_since(inner.transitioned_at);
                if elapsed >= inner.thresholds.cooldown() {
                    let transition = inner.transition(CircuitState::HalfOpen, now);
                    (inner.admit(true, now), Some(transition))
                } else {
                    (rejected(CircuitState::Open, Denial::Open), None)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_overdue(now) {
                    let transition = inner.transition(CircuitState::Open, now);
                    return (rejected(CircuitState::Open, Denial::Open), Some(transition));
                }
                let outstanding = inner.in_flight.values().filter(|f| f.probe).count();
                if outstanding < inner.thresholds.permitted_calls_in_half_open {
                    (inner.admit(true, now), None)
                } else {
                    (
                        rejected(CircuitState::HalfOpen, Denial::ProbePermitExhausted),
                        None,
                    )
                }
            }
        }
    }

    /// Record the outcome of the admission identified by `ticket`.
    pub fn record(
        &self,
        ticket: Ticket,
        outcome: Outcome,
        elapsed: Duration,
        now: Instant,
    ) -> (Recorded, Option<Transition>) {
        let mut inner = self.lock(now);
        inner.last_access = now;

        if ticket.epoch != inner.epoch {
            return (Recorded::Discarded, None);
        }
        let Some(call) = inner.in_flight.remove(&ticket.seq) else {
            return (Recorded::Discarded, None);
        };

        let state = inner.state;
        let transition = match (state, outcome) {
            (_, Outcome::Ignored) => None,
            (CircuitState::Closed, outcome) => {
                let failure = outcome == Outcome::Failure;
                let slow = !failure
                    && inner
                        .thresholds
                        .slow_call_duration()
                        .is_some_and(|limit| elapsed > limit);
                inner.window.push(Sample { failure, slow });
                inner
                    .should_trip()
                    .then(|| inner.transition(CircuitState::Open, now))
            }
            (CircuitState::HalfOpen, Outcome::Failure) if call.probe => {
                Some(inner.transition(CircuitState::Open, now))
            }
            (CircuitState::HalfOpen, Outcome::Success) if call.probe => {
                inner.probe_successes += 1;
                (inner.probe_successes >= inner.thresholds.success_threshold)
                    .then(|| inner.transition(CircuitState::Closed, now))
            }
            _ => None,
        };

        (Recorded::Applied, transition)
    }

    pub fn state(&self) -> CircuitState {
        self.lock(Instant::now()).state
    }

    pub fn epoch(&self) -> u64 {
        self.lock(Instant::now()).epoch
    }

    /// (samples, failures) currently in the window.
    pub fn window_counts(&self) -> (usize, usize) {
        let inner = self.lock(Instant::now());
        (inner.window.len(), inner.window.failures())
    }

    /// Outstanding admissions in the current epoch.
    pub fn in_flight(&self) -> usize {
        self.lock(Instant::now()).in_flight.len()
    }

    fn lock(&self, now: Instant) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => {
                let mut inner = poisoned.into_inner();
                tracing::warn!(
                    state = %inner.state,
                    "Circuit breaker state poisoned, resetting to closed"
                );
                let epoch = inner.epoch + 1;
                let thresholds = inner.thresholds.clone();
                *inner = Inner::new(thresholds, epoch, now);
                self.inner.clear_poison();
                inner
            }
        }
    }
}

impl Tracked for CircuitBreaker {
    fn last_access(&self) -> Instant {
        self.lock(Instant::now()).last_access
    }
}

fn rejected(state: CircuitState, denial: Denial) -> Acquire {
    Acquire::Rejected { state, denial }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(window: usize, minimum: usize) -> BreakerThresholds {
        BreakerThresholds {
            failure_rate_threshold: 50.0,
            sliding_window_size: window,
            minimum_number_of_calls: minimum,
            wait_duration_in_open_state_ms: 10_000,
            permitted_calls_in_half_open: 1,
            success_threshold: 1,
            ..BreakerThresholds::default()
        }
    }

    fn admit(cb: &CircuitBreaker, t: &BreakerThresholds, now: Instant) -> Ticket {
        match cb.try_acquire(t, now).0 {
            Acquire::Admitted { ticket, .. } => ticket,
            other => panic!("expected admission, got {other:?}"),
        }
    }

    fn run(cb: &CircuitBreaker, t: &BreakerThresholds, now: Instant, outcome: Outcome) {
        let ticket = admit(cb, t, now);
        cb.record(ticket, outcome, Duration::from_millis(1), now);
    }

    fn trip(cb: &CircuitBreaker, t: &BreakerThresholds, now: Instant) {
        for _ in 0..t.minimum_number_of_calls {
            run(cb, t, now, Outcome::Failure);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn does_not_trip_below_minimum() {
        let t = thresholds(10, 5);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);

        for _ in 0..4 {
            run(&cb, &t, now, Outcome::Failure);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        run(&cb, &t, now, Outcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn rate_is_over_most_recent_samples() {
        let t = thresholds(4, 4);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);

        for outcome in [Outcome::Failure, Outcome::Success, Outcome::Success, Outcome::Success] {
            run(&cb, &t, now, outcome);
        }
        // Failure slides out; next two failures make it 2/4.
        run(&cb, &t, now, Outcome::Success);
        run(&cb, &t, now, Outcome::Failure);
        assert_eq!(cb.state(), CircuitState::Closed);
        run(&cb, &t, now, Outcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn ignored_outcomes_are_not_sampled() {
        let t = thresholds(4, 4);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);

        for _ in 0..100 {
            run(&cb, &t, now, Outcome::Ignored);
        }
        assert_eq!(cb.window_counts(), (0, 0));
        assert_eq!(cb.in_flight(), 0);
    }

    #[test]
    fn open_rejects_until_cooldown() {
        let t = thresholds(2, 2);
        let start = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), start);
        trip(&cb, &t, start);

        let (acquire, _) = cb.try_acquire(&t, start + Duration::from_secs(9));
        assert_eq!(
            acquire,
            Acquire::Rejected {
                state: CircuitState::Open,
                denial: Denial::Open
            }
        );

        let (acquire, transition) = cb.try_acquire(&t, start + Duration::from_secs(10));
        assert!(matches!(acquire, Acquire::Admitted { probe: true, .. }));
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen
            })
        );
    }

    #[test]
    fn probe_success_closes() {
        let mut t = thresholds(2, 2);
        t.permitted_calls_in_half_open = 2;
        t.success_threshold = 2;
        let start = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), start);
        trip(&cb, &t, start);

        let later = start + Duration::from_secs(10);
        let first = admit(&cb, &t, later);
        let second = admit(&cb, &t, later);

        let (_, transition) = cb.record(first, Outcome::Success, Duration::ZERO, later);
        assert_eq!(transition, None);
        let (_, transition) = cb.record(second, Outcome::Success, Duration::ZERO, later);
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::Closed));
        assert_eq!(cb.window_counts(), (0, 0));
    }

    #[test]
    fn ignored_probe_releases_permit() {
        let t = thresholds(2, 2);
        let start = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), start);
        trip(&cb, &t, start);

        let later = start + Duration::from_secs(10);
        let probe = admit(&cb, &t, later);
        assert!(matches!(cb.try_acquire(&t, later).0, Acquire::Rejected { .. }));

        cb.record(probe, Outcome::Ignored, Duration::ZERO, later);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(matches!(
            cb.try_acquire(&t, later).0,
            Acquire::Admitted { probe: true, .. }
        ));
    }

    #[test]
    fn overdue_probe_counts_as_failure() {
        let t = thresholds(2, 2);
        let start = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), start);
        trip(&cb, &t, start);

        let probing = start + Duration::from_secs(10);
        let probe = admit(&cb, &t, probing);

        let (acquire, transition) = cb.try_acquire(&t, probing + t.probe_grace());
        assert!(matches!(acquire, Acquire::Rejected { state: CircuitState::Open, .. }));
        assert_eq!(transition.map(|t| t.to), Some(CircuitState::Open));

        // The abandoned probe reports eventually; it belongs to a dead epoch.
        let (recorded, _) = cb.record(probe, Outcome::Success, Duration::ZERO, probing);
        assert_eq!(recorded, Recorded::Discarded);
    }

    #[test]
    fn duplicate_and_stale_records_are_discarded() {
        let t = thresholds(4, 4);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);

        let ticket = admit(&cb, &t, now);
        assert_eq!(
            cb.record(ticket, Outcome::Failure, Duration::ZERO, now).0,
            Recorded::Applied
        );
        for _ in 0..10 {
            assert_eq!(
                cb.record(ticket, Outcome::Failure, Duration::ZERO, now).0,
                Recorded::Discarded
            );
        }
        assert_eq!(cb.window_counts(), (1, 1));
    }

    #[test]
    fn slow_successes_can_trip() {
        let mut t = thresholds(4, 4);
        t.slow_call_rate_threshold = 50.0;
        t.slow_call_duration_ms = Some(100);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);

        for elapsed in [10, 500, 10, 500] {
            let ticket = admit(&cb, &t, now);
            cb.record(ticket, Outcome::Success, Duration::from_millis(elapsed), now);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn long_successes_are_not_slow_by_default() {
        let t = thresholds(4, 4);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);

        for _ in 0..8 {
            let ticket = admit(&cb, &t, now);
            cb.record(ticket, Outcome::Success, Duration::from_secs(3), now);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn adopts_new_thresholds_on_acquire() {
        let t = thresholds(10, 10);
        let now = Instant::now();
        let cb = CircuitBreaker::new(t.clone(), now);
        for _ in 0..3 {
            run(&cb, &t, now, Outcome::Failure);
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        let tighter = thresholds(2, 2);
        run(&cb, &tighter, now, Outcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
