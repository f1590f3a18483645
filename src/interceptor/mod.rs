//! Interceptor chain.
//!
//! # Data Flow
//! ```text
//! (method, context)
//!     → key::extract (policy + partition key from current snapshot)
//!     → RateLimiterRegistry::try_acquire   ─ rejected → Rejection::RateLimited
//!     → CircuitBreakerRegistry::try_acquire ─ rejected → Rejection::CircuitOpen
//!     → CallPermit
//!     → call runs (optionally under the policy deadline)
//!     → CallPermit::complete (classify, record outcome)
//! ```
//!
//! # Design Decisions
//! - Rate limiting runs first, so a throttled caller never occupies a probe
//!   slot; a token spent on a call the breaker then rejects is not refunded
//! - Admission is synchronous and never awaits
//! - Unary, streaming and tower entry points share the same permit type, so
//!   each admitted call reports exactly once
//! - Guard-generated rejections never reach the breaker window

pub mod layer;
pub mod permit;
pub mod stream;

use std::future::Future;
use std::sync::Arc;

use futures_util::Stream;

use crate::breaker::{BreakerAdmission, CircuitBreakerRegistry};
use crate::classify::{CallStatus, ClassifyError};
use crate::clock::{self, SharedClock};
use crate::config::{ConfigError, GuardConfig, SnapshotHandle};
use crate::context::ContextLookup;
use crate::error::{GuardError, Rejection};
use crate::key;
use crate::observability::EventDispatcher;
use crate::ratelimit::RateLimiterRegistry;
use crate::registry::{Sweepable, Sweeper};

pub use layer::{GuardBody, GuardLayer, GuardService};
pub use permit::CallPermit;
pub use stream::GuardedStream;

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) snapshot: SnapshotHandle,
    pub(crate) limiter: Arc<RateLimiterRegistry>,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) events: EventDispatcher,
    pub(crate) clock: SharedClock,
}

/// Rate limiting and circuit breaking for RPC calls.
///
/// Cheap to clone; clones share all per-key state.
#[derive(Debug, Clone)]
pub struct Guard {
    shared: Arc<Shared>,
}

impl Guard {
    /// Guard with the system clock and the tracing + metrics event sinks.
    pub fn new(snapshot: SnapshotHandle) -> Self {
        GuardBuilder::new(snapshot).build()
    }

    /// Validate `config` and build a guard from it.
    pub fn from_config(config: GuardConfig) -> Result<Self, ConfigError> {
        let snapshot = SnapshotHandle::new(config).map_err(ConfigError::Validation)?;
        Ok(Self::new(snapshot))
    }

    pub fn builder(snapshot: SnapshotHandle) -> GuardBuilder {
        GuardBuilder::new(snapshot)
    }

    pub fn snapshot(&self) -> &SnapshotHandle {
        &self.shared.snapshot
    }

    pub fn rate_limiters(&self) -> &RateLimiterRegistry {
        &self.shared.limiter
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.shared.breakers
    }

    /// A sweeper over this guard's registries.
    pub fn sweeper(&self) -> Sweeper {
        let registries: Vec<Arc<dyn Sweepable>> = vec![
            self.shared.limiter.clone(),
            self.shared.breakers.clone(),
        ];
        Sweeper::new(
            registries,
            self.shared.snapshot.clone(),
            self.shared.clock.clone(),
        )
    }

    /// Admit or reject a call to `method`.
    pub fn admit<C>(&self, method: &str, ctx: &C) -> Result<CallPermit, Rejection>
    where
        C: ContextLookup + ?Sized,
    {
        let shared = &self.shared;
        let snapshot = shared.snapshot.load();
        let (key, policy) = key::extract(&snapshot, method, ctx);

        if let Some(quota) = &policy.quota {
            if !shared
                .limiter
                .try_acquire(&key, quota, policy.token_cost)
                .is_admitted()
            {
                return Err(self.reject(Rejection::RateLimited { key }));
            }
        }

        let breaker = match &policy.breaker {
            None => None,
            Some(thresholds) => match shared.breakers.try_acquire(&key, thresholds) {
                BreakerAdmission::Admitted(permit) => Some(permit),
                BreakerAdmission::Rejected(rejection) => {
                    return Err(self.reject(Rejection::CircuitOpen {
                        key,
                        state: rejection.state,
                    }));
                }
            },
        };

        Ok(CallPermit::new(Arc::clone(shared), key, policy, breaker))
    }

    /// Run a unary call under the guard.
    ///
    /// `call` is only invoked when the call is admitted. A policy deadline,
    /// if any, bounds the call and is reported as `DEADLINE_EXCEEDED`.
    pub async fn call<C, F, Fut, T, E>(
        &self,
        method: &str,
        ctx: &C,
        call: F,
    ) -> Result<T, GuardError<E>>
    where
        C: ContextLookup + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError,
    {
        let permit = self.admit(method, ctx)?;

        let result = match permit.deadline() {
            Some(deadline) => match tokio::time::timeout(deadline, call()).await {
                Ok(result) => result,
                Err(_) => {
                    let key = permit.key().clone();
                    permit.complete(&CallStatus::deadline_exceeded());
                    return Err(GuardError::DeadlineExceeded { key, deadline });
                }
            },
            None => call().await,
        };

        match result {
            Ok(value) => {
                permit.complete(&CallStatus::ok());
                Ok(value)
            }
            Err(e) => {
                permit.complete(&e.call_status());
                Err(GuardError::Call(e))
            }
        }
    }

    /// Admit a streaming call once, at stream start.
    ///
    /// The returned stream records the terminal status when it ends, fails,
    /// or is dropped.
    pub fn call_streaming<C, F, S, T, E>(
        &self,
        method: &str,
        ctx: &C,
        open: F,
    ) -> Result<GuardedStream<S>, Rejection>
    where
        C: ContextLookup + ?Sized,
        F: FnOnce() -> S,
        S: Stream<Item = Result<T, E>>,
        E: ClassifyError,
    {
        let permit = self.admit(method, ctx)?;
        Ok(GuardedStream::new(open(), permit))
    }

    /// Wrap in a tower layer.
    pub fn layer(&self) -> GuardLayer {
        GuardLayer::new(self.clone())
    }

    fn reject(&self, rejection: Rejection) -> Rejection {
        tracing::debug!(key = %rejection.key(), reason = %rejection.reason(), "Rejecting call");
        self.shared.events.rejected(rejection.key(), rejection.reason());
        rejection
    }
}

/// Builder for [`Guard`].
pub struct GuardBuilder {
    snapshot: SnapshotHandle,
    clock: SharedClock,
    events: EventDispatcher,
}

impl GuardBuilder {
    pub fn new(snapshot: SnapshotHandle) -> Self {
        Self {
            snapshot,
            clock: clock::system(),
            events: EventDispatcher::standard(),
        }
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Guard {
        let limiter = Arc::new(RateLimiterRegistry::new(self.clock.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            self.clock.clone(),
            self.events.clone(),
        ));

        Guard {
            shared: Arc::new(Shared {
                snapshot: self.snapshot,
                limiter,
                breakers,
                events: self.events,
                clock: self.clock,
            }),
        }
    }
}
