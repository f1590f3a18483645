//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, rates within (0, 100])
//! - Check threshold consistency (minimum calls fit in the window)
//! - Detect duplicate rules
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before a snapshot is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::classify::Code;
use crate::config::schema::{BreakerThresholds, GuardConfig, Quota};

/// A single semantic violation. `scope` names the default or the rule pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{scope}: quota capacity must be positive (got {value})")]
    NonPositiveCapacity { scope: String, value: i64 },

    #[error("{scope}: refill tokens must be positive (got {value})")]
    NonPositiveRefill { scope: String, value: i64 },

    #[error("{scope}: refill interval must be positive")]
    ZeroRefillInterval { scope: String },

    #[error("{scope}: {field} must be within (0, 100]")]
    RateOutOfRange { scope: String, field: &'static str },

    #[error("{scope}: sliding window size must be positive")]
    EmptyWindow { scope: String },

    #[error("{scope}: minimum number of calls ({minimum}) exceeds window size ({window})")]
    MinimumExceedsWindow {
        scope: String,
        minimum: usize,
        window: usize,
    },

    #[error("{scope}: minimum number of calls must be positive")]
    ZeroMinimumCalls { scope: String },

    #[error("{scope}: open-state wait duration must be positive")]
    ZeroCooldown { scope: String },

    #[error("{scope}: at least one half-open probe must be permitted")]
    ZeroProbePermits { scope: String },

    #[error("{scope}: success threshold must be positive")]
    ZeroSuccessThreshold { scope: String },

    #[error("{scope}: probe grace period must be positive")]
    ZeroProbeGrace { scope: String },

    #[error("{scope}: token cost must be positive")]
    ZeroTokenCost { scope: String },

    #[error("{scope}: deadline must be positive")]
    ZeroDeadline { scope: String },

    #[error("policy pattern must not be empty")]
    EmptyPattern,

    #[error("duplicate policy for pattern {0}")]
    DuplicatePattern(String),

    #[error("status code {0} is both a failure and an ignored code")]
    ConflictingCode(Code),

    #[error("registry sweep interval must be positive")]
    ZeroSweepInterval,

    #[error("registry max_keys must be positive")]
    ZeroMaxKeys,
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_quota("default", &config.rate_limit.default, &mut errors);
    validate_thresholds("default", &config.circuit_breaker.default, &mut errors);

    if config.default_deadline_ms == Some(0) {
        errors.push(ValidationError::ZeroDeadline {
            scope: "default".into(),
        });
    }

    for code in config
        .classifier
        .failure_codes
        .intersection(&config.classifier.ignored_codes)
    {
        errors.push(ValidationError::ConflictingCode(*code));
    }

    if config.registry.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroSweepInterval);
    }
    if config.registry.max_keys == 0 {
        errors.push(ValidationError::ZeroMaxKeys);
    }

    let mut seen = HashSet::new();
    for rule in &config.policies {
        if rule.pattern.trim().is_empty() {
            errors.push(ValidationError::EmptyPattern);
            continue;
        }
        // Same pattern with different attribute guards is a distinct rule.
        if !seen.insert((&rule.pattern, &rule.match_attributes)) {
            errors.push(ValidationError::DuplicatePattern(rule.pattern.clone()));
        }

        let scope = rule.pattern.as_str();
        if let Some(quota) = &rule.rate_limit {
            validate_quota(scope, quota, &mut errors);
        }
        if let Some(thresholds) = &rule.circuit_breaker {
            validate_thresholds(scope, thresholds, &mut errors);
        }
        if rule.token_cost == 0 {
            errors.push(ValidationError::ZeroTokenCost {
                scope: scope.into(),
            });
        }
        if rule.deadline_ms == Some(0) {
            errors.push(ValidationError::ZeroDeadline {
                scope: scope.into(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_quota(scope: &str, quota: &Quota, errors: &mut Vec<ValidationError>) {
    if quota.capacity <= 0 {
        errors.push(ValidationError::NonPositiveCapacity {
            scope: scope.into(),
            value: quota.capacity,
        });
    }
    if quota.refill_tokens <= 0 {
        errors.push(ValidationError::NonPositiveRefill {
            scope: scope.into(),
            value: quota.refill_tokens,
        });
    }
    if quota.refill_interval_ms == 0 {
        errors.push(ValidationError::ZeroRefillInterval {
            scope: scope.into(),
        });
    }
}

fn validate_thresholds(scope: &str, t: &BreakerThresholds, errors: &mut Vec<ValidationError>) {
    let in_range = |rate: f64| rate > 0.0 && rate <= 100.0;

    if !in_range(t.failure_rate_threshold) {
        errors.push(ValidationError::RateOutOfRange {
            scope: scope.into(),
            field: "failure_rate_threshold",
        });
    }
    if !in_range(t.slow_call_rate_threshold) {
        errors.push(ValidationError::RateOutOfRange {
            scope: scope.into(),
            field: "slow_call_rate_threshold",
        });
    }
    if t.sliding_window_size == 0 {
        errors.push(ValidationError::EmptyWindow {
            scope: scope.into(),
        });
    }
    if t.minimum_number_of_calls == 0 {
        errors.push(ValidationError::ZeroMinimumCalls {
            scope: scope.into(),
        });
    } else if t.minimum_number_of_calls > t.sliding_window_size && t.sliding_window_size > 0 {
        errors.push(ValidationError::MinimumExceedsWindow {
            scope: scope.into(),
            minimum: t.minimum_number_of_calls,
            window: t.sliding_window_size,
        });
    }
    if t.wait_duration_in_open_state_ms == 0 {
        errors.push(ValidationError::ZeroCooldown {
            scope: scope.into(),
        });
    }
    if t.permitted_calls_in_half_open == 0 {
        errors.push(ValidationError::ZeroProbePermits {
            scope: scope.into(),
        });
    }
    if t.success_threshold == 0 {
        errors.push(ValidationError::ZeroSuccessThreshold {
            scope: scope.into(),
        });
    }
    if t.probe_grace_ms == 0 {
        errors.push(ValidationError::ZeroProbeGrace {
            scope: scope.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PolicyRule;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GuardConfig::default()), Ok(()));
    }

    #[test]
    fn collects_all_errors() {
        let mut config = GuardConfig::default();
        config.rate_limit.default.capacity = 0;
        config.circuit_breaker.default.wait_duration_in_open_state_ms = 0;
        config.circuit_breaker.default.minimum_number_of_calls = 100;
        config.classifier.ignored_codes.insert(Code::Internal);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::NonPositiveCapacity {
            scope: "default".into(),
            value: 0
        }));
        assert!(errors.contains(&ValidationError::ConflictingCode(Code::Internal)));
    }

    #[test]
    fn rejects_duplicate_and_bad_rules() {
        let mut config = GuardConfig::default();
        let mut bad = PolicyRule::new("svc/");
        bad.token_cost = 0;
        bad.rate_limit = Some(Quota {
            capacity: -3,
            ..Quota::default()
        });
        config.policies = vec![PolicyRule::new("svc/"), bad, PolicyRule::new(" ")];

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicatePattern("svc/".into())));
        assert!(errors.contains(&ValidationError::ZeroTokenCost {
            scope: "svc/".into()
        }));
        assert!(errors.contains(&ValidationError::EmptyPattern));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::NonPositiveCapacity { value: -3, .. }
        )));
    }

    #[test]
    fn same_pattern_with_different_guards_is_allowed() {
        let mut config = GuardConfig::default();
        let mut acme = PolicyRule::new("svc/");
        acme.match_attributes.insert("x-tenant-id".into(), "acme".into());
        config.policies = vec![PolicyRule::new("svc/"), acme];

        assert_eq!(validate_config(&config), Ok(()));
    }
}
