//! Compiled, versioned policy snapshots.
//!
//! # Responsibilities
//! - Turn a validated [`GuardConfig`] into an immutable lookup structure
//! - Resolve the policy for a method (plus context) by most-specific match
//! - Publish snapshots through an atomically swappable handle
//!
//! # Design Decisions
//! - A snapshot is never mutated; reload builds a new one and swaps it
//! - Rule overrides replace the whole default quota/thresholds struct
//! - Per-key runtime state lives in the registries, not here, so a swap
//!   never touches counters or breaker state

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::classify::OutcomeClassifier;
use crate::config::schema::{BreakerThresholds, Concern, GuardConfig, Partition, PolicyRule, Quota};
use crate::config::validation::{validate_config, ValidationError};
use crate::context::{ContextLookup, EmptyContext};
use crate::key::normalize_method;

/// Effective policy for a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Policy {
    /// Pattern of the rule that matched, `None` for the default policy.
    pub pattern: Option<String>,
    pub partition: Partition,
    pub key_attributes: Vec<String>,
    /// Attribute values the matched rule requires, in name order. They are
    /// part of the key, so rules that differ only here never share state.
    pub match_attributes: Vec<(String, String)>,
    /// `None` when rate limiting is switched off for this call.
    pub quota: Option<Quota>,
    /// `None` when circuit breaking is switched off for this call.
    pub breaker: Option<BreakerThresholds>,
    pub token_cost: u32,
    pub deadline_ms: Option<u64>,
}

impl Policy {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

#[derive(Debug)]
enum Matcher {
    Any,
    Exact(String),
    Prefix(String),
}

impl Matcher {
    fn parse(pattern: &str) -> Self {
        let pattern = normalize_method(pattern.trim());
        if pattern == "*" {
            Matcher::Any
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Matcher::Prefix(prefix.to_string())
        } else if pattern.ends_with('/') {
            Matcher::Prefix(pattern.to_string())
        } else {
            Matcher::Exact(pattern.to_string())
        }
    }

    /// Specificity of a match as (exact, prefix length), or `None`.
    fn score(&self, method: &str) -> Option<(bool, usize)> {
        match self {
            Matcher::Any => Some((false, 0)),
            Matcher::Exact(m) => (m == method).then_some((true, m.len())),
            Matcher::Prefix(p) => method.starts_with(p.as_str()).then_some((false, p.len())),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    matcher: Matcher,
    match_attributes: Vec<(String, String)>,
    policy: Arc<Policy>,
}

impl CompiledRule {
    fn score<C>(&self, method: &str, ctx: &C) -> Option<(bool, usize, usize)>
    where
        C: ContextLookup + ?Sized,
    {
        let (exact, len) = self.matcher.score(method)?;
        let satisfied = self
            .match_attributes
            .iter()
            .all(|(name, value)| ctx.get(name) == Some(value.as_str()));
        satisfied.then_some((exact, len, self.match_attributes.len()))
    }
}

/// Immutable, versioned policy table.
#[derive(Debug)]
pub struct PolicySnapshot {
    version: u64,
    config: Arc<GuardConfig>,
    rules: Vec<CompiledRule>,
    default_policy: Arc<Policy>,
    classifier: OutcomeClassifier,
}

impl PolicySnapshot {
    /// Validate and compile `config` into snapshot `version`.
    pub fn compile(version: u64, config: GuardConfig) -> Result<Self, Vec<ValidationError>> {
        validate_config(&config)?;

        let default_policy = Arc::new(Policy {
            pattern: None,
            partition: Partition::Method,
            key_attributes: Vec::new(),
            match_attributes: Vec::new(),
            quota: config.rate_limit.enabled.then_some(config.rate_limit.default),
            breaker: config
                .circuit_breaker
                .enabled
                .then(|| config.circuit_breaker.default.clone()),
            token_cost: 1,
            deadline_ms: config.default_deadline_ms,
        });

        let rules = config
            .policies
            .iter()
            .map(|rule| CompiledRule {
                matcher: Matcher::parse(&rule.pattern),
                match_attributes: lowercase_names(&rule.match_attributes),
                policy: Arc::new(rule_policy(&config, rule)),
            })
            .collect();

        Ok(Self {
            version,
            classifier: OutcomeClassifier::new(&config.classifier),
            config: Arc::new(config),
            rules,
            default_policy,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn classifier(&self) -> &OutcomeClassifier {
        &self.classifier
    }

    /// Most specific rule for `method` whose attribute guards `ctx` satisfies.
    /// Ties go to the rule declared first.
    pub fn resolve<C>(&self, method: &str, ctx: &C) -> Arc<Policy>
    where
        C: ContextLookup + ?Sized,
    {
        let method = normalize_method(method);
        let mut best: Option<((bool, usize, usize), &CompiledRule)> = None;

        for rule in &self.rules {
            let Some(score) = rule.score(method, ctx) else {
                continue;
            };
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, rule));
            }
        }

        best.map_or_else(
            || Arc::clone(&self.default_policy),
            |(_, rule)| Arc::clone(&rule.policy),
        )
    }

    /// Resolve without any call context.
    pub fn resolve_policy(&self, method: &str) -> Arc<Policy> {
        self.resolve(method, &EmptyContext)
    }
}

fn rule_policy(config: &GuardConfig, rule: &PolicyRule) -> Policy {
    let rate_limited =
        config.rate_limit.enabled && !rule.disabled.contains(&Concern::RateLimit);
    let breaker_enabled =
        config.circuit_breaker.enabled && !rule.disabled.contains(&Concern::CircuitBreaker);

    Policy {
        pattern: Some(normalize_method(rule.pattern.trim()).to_string()),
        partition: rule.partition,
        key_attributes: rule
            .key_attributes
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect(),
        match_attributes: lowercase_names(&rule.match_attributes),
        quota: rate_limited.then(|| rule.rate_limit.unwrap_or(config.rate_limit.default)),
        breaker: breaker_enabled.then(|| {
            rule.circuit_breaker
                .clone()
                .unwrap_or_else(|| config.circuit_breaker.default.clone())
        }),
        token_cost: rule.token_cost,
        deadline_ms: rule.deadline_ms.or(config.default_deadline_ms),
    }
}

fn lowercase_names(attributes: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = attributes
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Shared, atomically replaceable reference to the current snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    current: Arc<ArcSwap<PolicySnapshot>>,
}

impl SnapshotHandle {
    /// Compile `config` as version 1.
    pub fn new(config: GuardConfig) -> Result<Self, Vec<ValidationError>> {
        let snapshot = PolicySnapshot::compile(1, config)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
        })
    }

    /// The snapshot in effect right now.
    pub fn load(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Validate, compile and publish `config`. On error the current
    /// snapshot stays in effect.
    pub fn replace(&self, config: GuardConfig) -> Result<u64, Vec<ValidationError>> {
        let version = self.version() + 1;
        let snapshot = PolicySnapshot::compile(version, config)?;
        self.current.store(Arc::new(snapshot));
        tracing::info!(version, "Policy snapshot replaced");
        Ok(version)
    }

    /// Convenience for [`PolicySnapshot::resolve`] on the current snapshot.
    pub fn resolve_policy<C>(&self, method: &str, ctx: &C) -> Arc<Policy>
    where
        C: ContextLookup + ?Sized,
    {
        self.current.load().resolve(method, ctx)
    }
}
