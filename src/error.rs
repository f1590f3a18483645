//! Error taxonomy for guarded calls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::breaker::CircuitState;
use crate::classify::Code;
use crate::key::CallKey;

/// Why a call was turned away before reaching the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    RateLimited,
    CircuitOpen,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::RateLimited => "rate_limited",
            RejectReason::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call rejected by the guard. Always recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Quota exhausted for the key; retry later.
    #[error("rate limit exceeded for {key}")]
    RateLimited { key: CallKey },

    /// Breaker is open (or half-open with every probe permit taken).
    #[error("circuit breaker is {state} for {key}")]
    CircuitOpen { key: CallKey, state: CircuitState },
}

impl Rejection {
    pub fn reason(&self) -> RejectReason {
        match self {
            Rejection::RateLimited { .. } => RejectReason::RateLimited,
            Rejection::CircuitOpen { .. } => RejectReason::CircuitOpen,
        }
    }

    pub fn key(&self) -> &CallKey {
        match self {
            Rejection::RateLimited { key } | Rejection::CircuitOpen { key, .. } => key,
        }
    }

    /// Status code reported to RPC peers.
    pub fn code(&self) -> Code {
        match self {
            Rejection::RateLimited { .. } => Code::ResourceExhausted,
            Rejection::CircuitOpen { .. } => Code::Unavailable,
        }
    }
}

/// Result of a guarded call that did not produce a value.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The call overran the deadline configured for its policy.
    #[error("call for {key} exceeded its {deadline:?} deadline")]
    DeadlineExceeded { key: CallKey, deadline: Duration },

    /// The call itself failed.
    #[error("{0}")]
    Call(E),
}

impl<E> GuardError<E> {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            GuardError::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GuardError::Rejected(Rejection::RateLimited { .. }))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::Rejected(Rejection::CircuitOpen { .. }))
    }

    /// The inner call error, if the call was made and failed.
    pub fn into_call_error(self) -> Option<E> {
        match self {
            GuardError::Call(e) => Some(e),
            _ => None,
        }
    }
}
