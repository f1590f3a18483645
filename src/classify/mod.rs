//! Outcome classification.
//!
//! # Data Flow
//! ```text
//! Completed call (value / error / response / timeout)
//!     → status.rs (normalise to CallStatus { code, origin })
//!     → OutcomeClassifier (code-set membership)
//!     → Outcome { Success | Failure | Ignored }
//!     → breaker window
//! ```
//!
//! # Design Decisions
//! - Only failures attributable to the callee's health count toward breaker
//!   statistics
//! - Rejections produced by the guard itself are always `Ignored`; this rule
//!   is not configurable
//! - Caller-side errors in the ignored set never trip the breaker
//! - Everything not explicitly a failure is a success (4xx-style business
//!   errors do not indicate an unhealthy callee)

pub mod code;
pub mod status;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;

pub use code::Code;
pub use status::{CallStatus, ClassifyError, Origin};

/// Label fed to the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Ignored,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Ignored => "ignored",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps call statuses to breaker outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeClassifier {
    failure_codes: BTreeSet<Code>,
    ignored_codes: BTreeSet<Code>,
}

impl OutcomeClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            failure_codes: config.failure_codes.clone(),
            ignored_codes: config.ignored_codes.clone(),
        }
    }

    pub fn classify(&self, status: &CallStatus) -> Outcome {
        if status.origin == Origin::Guard {
            return Outcome::Ignored;
        }
        if status.origin == Origin::Caller && self.ignored_codes.contains(&status.code) {
            return Outcome::Ignored;
        }
        if self.failure_codes.contains(&status.code) {
            return Outcome::Failure;
        }
        Outcome::Success
    }

    /// Classify a `Result`, using `Ok` for successful values.
    pub fn classify_result<T, E: ClassifyError>(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(_) => self.classify(&CallStatus::ok()),
            Err(e) => self.classify(&e.call_status()),
        }
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;

    #[test]
    fn default_table() {
        let c = OutcomeClassifier::default();

        assert_eq!(c.classify(&CallStatus::ok()), Outcome::Success);
        assert_eq!(c.classify(&CallStatus::callee(Code::Unavailable)), Outcome::Failure);
        assert_eq!(c.classify(&CallStatus::deadline_exceeded()), Outcome::Failure);
        assert_eq!(c.classify(&CallStatus::callee(Code::Internal)), Outcome::Failure);
        assert_eq!(c.classify(&CallStatus::callee(Code::NotFound)), Outcome::Success);
        assert_eq!(c.classify(&CallStatus::cancelled()), Outcome::Ignored);
        assert_eq!(
            c.classify(&CallStatus::caller(Code::InvalidArgument)),
            Outcome::Ignored
        );
    }

    #[test]
    fn callee_side_invalid_argument_is_a_business_error() {
        let c = OutcomeClassifier::default();
        assert_eq!(
            c.classify(&CallStatus::callee(Code::InvalidArgument)),
            Outcome::Success
        );
    }

    #[test]
    fn guard_rejections_are_always_ignored() {
        let mut config = ClassifierConfig::default();
        config.failure_codes.insert(Code::ResourceExhausted);
        let c = OutcomeClassifier::new(&config);

        let limited = Rejection::RateLimited { key: "svc/M".into() };
        assert_eq!(c.classify(&limited.call_status()), Outcome::Ignored);
        assert_eq!(
            c.classify(&CallStatus::new(Code::Unavailable, Origin::Guard)),
            Outcome::Ignored
        );
    }

    #[test]
    fn classify_result_uses_error_status() {
        let c = OutcomeClassifier::default();
        let ok: Result<(), CallStatus> = Ok(());
        let failed: Result<(), CallStatus> = Err(CallStatus::callee(Code::Unavailable));

        assert_eq!(c.classify_result(&ok), Outcome::Success);
        assert_eq!(c.classify_result(&failed), Outcome::Failure);
    }
}
