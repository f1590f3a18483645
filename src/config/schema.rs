//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::Code;

/// Root configuration for the guard.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Rate limiting defaults.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker defaults.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Status-code table used to label call outcomes.
    pub classifier: ClassifierConfig,

    /// Per-key state retention.
    pub registry: RegistryConfig,

    /// Deadline applied to guarded calls with no rule-specific deadline.
    pub default_deadline_ms: Option<u64>,

    /// Method-pattern rules, most specific match wins.
    pub policies: Vec<PolicyRule>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GuardConfig {
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Quota for calls no rule overrides.
    pub default: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: Quota::default(),
        }
    }
}

/// Token bucket quota.
///
/// Signed on purpose: a zero or negative capacity is representable and
/// means "reject everything".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Quota {
    /// Maximum tokens (burst size).
    pub capacity: i64,

    /// Tokens restored per refill interval.
    pub refill_tokens: i64,

    /// Refill interval in milliseconds.
    pub refill_interval_ms: u64,
}

impl Quota {
    pub fn per_interval(tokens: i64, interval: Duration) -> Self {
        Self {
            capacity: tokens,
            refill_tokens: tokens,
            refill_interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_tokens: 100,
            refill_interval_ms: 1000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    /// Thresholds for calls no rule overrides.
    pub default: BreakerThresholds,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: BreakerThresholds::default(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerThresholds {
    /// Percentage of failures (0-100] that opens the circuit.
    pub failure_rate_threshold: f64,

    /// Percentage of slow calls (0-100] that opens the circuit.
    pub slow_call_rate_threshold: f64,

    /// Calls slower than this count as slow, in milliseconds. Unset turns
    /// slow-call detection off.
    pub slow_call_duration_ms: Option<u64>,

    /// Number of most recent outcomes kept in the window.
    pub sliding_window_size: usize,

    /// Outcomes required before the failure rate is evaluated.
    pub minimum_number_of_calls: usize,

    /// Cooldown before an open circuit admits a probe, in milliseconds.
    pub wait_duration_in_open_state_ms: u64,

    /// Concurrent probes admitted while half-open.
    pub permitted_calls_in_half_open: usize,

    /// Consecutive probe successes needed to close.
    pub success_threshold: usize,

    /// A probe outstanding this long counts as failed, in milliseconds.
    pub probe_grace_ms: u64,
}

impl BreakerThresholds {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_state_ms)
    }

    pub fn slow_call_duration(&self) -> Option<Duration> {
        self.slow_call_duration_ms.map(Duration::from_millis)
    }

    pub fn probe_grace(&self) -> Duration {
        Duration::from_millis(self.probe_grace_ms)
    }
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_ms: None,
            sliding_window_size: 60,
            minimum_number_of_calls: 10,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open: 5,
            success_threshold: 3,
            probe_grace_ms: 30_000,
        }
    }
}

/// Outcome classification table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Codes that count against the callee.
    pub failure_codes: BTreeSet<Code>,

    /// Codes ignored when attributable to the caller.
    pub ignored_codes: BTreeSet<Code>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            failure_codes: [Code::Unavailable, Code::DeadlineExceeded, Code::Internal]
                .into_iter()
                .collect(),
            ignored_codes: [Code::Cancelled, Code::InvalidArgument]
                .into_iter()
                .collect(),
        }
    }
}

/// Per-key state retention.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Evict keys untouched for this long, in seconds.
    pub idle_eviction_secs: u64,

    /// Interval between eviction sweeps, in seconds.
    pub sweep_interval_secs: u64,

    /// Upper bound on live keys per registry.
    pub max_keys: usize,
}

impl RegistryConfig {
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_eviction_secs: 3600,
            sweep_interval_secs: 60,
            max_keys: 10_000,
        }
    }
}

/// How calls matching a rule are partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// One partition per method identity.
    #[default]
    Method,
    /// One partition shared by every method the pattern matches.
    Pattern,
}

/// Concern a rule can switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Concern {
    RateLimit,
    CircuitBreaker,
}

/// Policy override for a set of methods.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PolicyRule {
    /// Method identity, `prefix/` or `prefix*` for prefix matches, `*` for all.
    pub pattern: String,

    #[serde(default)]
    pub partition: Partition,

    /// Context attributes prefixed to the key (e.g. `x-tenant-id`).
    #[serde(default)]
    pub key_attributes: Vec<String>,

    /// Context attributes that must hold these values for the rule to apply.
    #[serde(default)]
    pub match_attributes: BTreeMap<String, String>,

    /// Concerns switched off for matching calls.
    #[serde(default)]
    pub disabled: BTreeSet<Concern>,

    /// Tokens consumed per call.
    #[serde(default = "default_token_cost")]
    pub token_cost: u32,

    #[serde(default)]
    pub rate_limit: Option<Quota>,

    #[serde(default)]
    pub circuit_breaker: Option<BreakerThresholds>,

    /// Deadline for matching calls, in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_token_cost() -> u32 {
    1
}

impl PolicyRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            partition: Partition::default(),
            key_attributes: Vec::new(),
            match_attributes: BTreeMap::new(),
            disabled: BTreeSet::new(),
            token_cost: default_token_cost(),
            rate_limit: None,
            circuit_breaker: None,
            deadline_ms: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
