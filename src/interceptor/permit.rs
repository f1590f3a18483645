//! Admission tokens for guarded calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::breaker::BreakerPermit;
use crate::classify::{CallStatus, ClassifyError, Outcome};
use crate::config::Policy;
use crate::interceptor::Shared;
use crate::key::CallKey;

/// Proof that a call passed both the rate limiter and the breaker.
///
/// Report the terminal status with [`CallPermit::complete`]. A permit
/// dropped without completion reports a caller-side cancellation, which is
/// ignored by the breaker but still frees any probe slot it held.
#[must_use = "dropping a permit reports the call as cancelled"]
#[derive(Debug)]
pub struct CallPermit {
    shared: Arc<Shared>,
    key: CallKey,
    policy: Arc<Policy>,
    breaker: Option<BreakerPermit>,
    started: Instant,
    completed: bool,
}

impl CallPermit {
    pub(crate) fn new(
        shared: Arc<Shared>,
        key: CallKey,
        policy: Arc<Policy>,
        breaker: Option<BreakerPermit>,
    ) -> Self {
        let started = shared.clock.now();
        Self {
            shared,
            key,
            policy,
            breaker,
            started,
            completed: false,
        }
    }

    pub fn key(&self) -> &CallKey {
        &self.key
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Deadline the policy puts on this call, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.policy.deadline()
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.breaker.as_ref().is_some_and(BreakerPermit::is_probe)
    }

    /// Report the call's terminal status and return how it was classified.
    pub fn complete(mut self, status: &CallStatus) -> Outcome {
        self.finish(status)
    }

    /// Report a `Result`, treating `Ok` as success.
    pub fn complete_result<T, E: ClassifyError>(self, result: &Result<T, E>) -> Outcome {
        let status = match result {
            Ok(_) => CallStatus::ok(),
            Err(e) => e.call_status(),
        };
        self.complete(&status)
    }

    fn finish(&mut self, status: &CallStatus) -> Outcome {
        self.completed = true;

        let outcome = self.shared.snapshot.load().classifier().classify(status);
        let elapsed = self.shared.clock.now().saturating_duration_since(self.started);

        if let Some(permit) = self.breaker.take() {
            self.shared.breakers.complete(permit, outcome, elapsed);
        }
        self.shared.events.outcome(&self.key, outcome);
        outcome
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.completed {
            self.finish(&CallStatus::cancelled());
        }
    }
}
