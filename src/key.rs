//! Partition keys.
//!
//! # Responsibilities
//! - Name the partition a call belongs to (method, optionally prefixed by
//!   context attributes such as the tenant id)
//! - Pick the policy that applies to a call from the current snapshot
//!
//! # Design Decisions
//! - Extraction is a pure function of (method, context, snapshot)
//! - Missing key attributes become `unknown` so such calls share one
//!   partition instead of bypassing the guard
//! - Keys are `Arc<str>` so registries and permits clone them cheaply

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::config::snapshot::{Policy, PolicySnapshot};
use crate::config::Partition;
use crate::context::ContextLookup;

/// Placeholder for key attributes absent from the call context.
pub const UNKNOWN_ATTRIBUTE: &str = "unknown";

/// Identifies one partition of limiter/breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey(Arc<str>);

impl CallKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading key attribute (the tenant for tenant-scoped rules), or
    /// `unknown` for unprefixed keys.
    pub fn tenant(&self) -> &str {
        match self.0.split_once(':') {
            Some((tenant, _)) if !tenant.is_empty() => tenant,
            _ => UNKNOWN_ATTRIBUTE,
        }
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CallKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CallKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Strip the leading `/` carried by gRPC request paths.
pub fn normalize_method(method: &str) -> &str {
    method.strip_prefix('/').unwrap_or(method)
}

/// Build the key for a call already resolved to `policy`.
pub fn key_for<C>(policy: &Policy, method: &str, ctx: &C) -> CallKey
where
    C: ContextLookup + ?Sized,
{
    let method = normalize_method(method);
    let base = match (policy.partition, policy.pattern.as_deref()) {
        (Partition::Pattern, Some(pattern)) => pattern,
        _ => method,
    };

    // Required values already covered by a key attribute are not repeated.
    let required = policy
        .match_attributes
        .iter()
        .filter(|(name, _)| !policy.key_attributes.contains(name))
        .map(|(_, value)| value.as_str());
    let mut segments = policy
        .key_attributes
        .iter()
        .map(|attribute| ctx.get(attribute).unwrap_or(UNKNOWN_ATTRIBUTE))
        .chain(required)
        .peekable();

    if segments.peek().is_none() {
        return CallKey::new(base);
    }

    let mut key = String::with_capacity(base.len() + 32);
    for segment in segments {
        key.push_str(segment);
        key.push(':');
    }
    key.push_str(base);
    CallKey::from(key)
}

/// Resolve the policy for a call and derive its key.
pub fn extract<C>(snapshot: &PolicySnapshot, method: &str, ctx: &C) -> (CallKey, Arc<Policy>)
where
    C: ContextLookup + ?Sized,
{
    let policy = snapshot.resolve(method, ctx);
    let key = key_for(&policy, method, ctx);
    (key, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuardConfig, PolicyRule};
    use crate::context::{EmptyContext, RequestContext};

    fn snapshot(rules: Vec<PolicyRule>) -> PolicySnapshot {
        let config = GuardConfig {
            policies: rules,
            ..GuardConfig::default()
        };
        PolicySnapshot::compile(1, config).unwrap()
    }

    #[test]
    fn unmatched_calls_use_the_method() {
        let snap = snapshot(vec![]);
        let (key, policy) = extract(&snap, "/billing.Ledger/Charge", &EmptyContext);

        assert_eq!(key.as_str(), "billing.Ledger/Charge");
        assert!(policy.pattern.is_none());
    }

    #[test]
    fn tenant_prefixed_key() {
        let mut rule = PolicyRule::new("billing.Ledger/");
        rule.key_attributes = vec!["x-tenant-id".into()];
        let snap = snapshot(vec![rule]);

        let ctx = RequestContext::for_tenant("tenant123");
        let (key, _) = extract(&snap, "billing.Ledger/Charge", &ctx);
        assert_eq!(key.as_str(), "tenant123:billing.Ledger/Charge");
        assert_eq!(key.tenant(), "tenant123");

        let (anon, _) = extract(&snap, "billing.Ledger/Charge", &EmptyContext);
        assert_eq!(anon.as_str(), "unknown:billing.Ledger/Charge");
    }

    #[test]
    fn pattern_partition_shares_one_key() {
        let mut rule = PolicyRule::new("search.Index/");
        rule.partition = Partition::Pattern;
        let snap = snapshot(vec![rule]);

        let (a, _) = extract(&snap, "search.Index/Query", &EmptyContext);
        let (b, _) = extract(&snap, "search.Index/Suggest", &EmptyContext);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "search.Index/");
    }

    #[test]
    fn match_attributes_separate_partitions() {
        let generic = PolicyRule::new("svc.A/");
        let mut acme = PolicyRule::new("svc.A/");
        acme.match_attributes
            .insert("X-Tenant-Id".into(), "acme".into());
        let snap = snapshot(vec![generic, acme]);

        let ctx = RequestContext::for_tenant("acme");
        let (tenant_key, policy) = extract(&snap, "svc.A/Get", &ctx);
        assert_eq!(policy.match_attributes.len(), 1);
        assert_eq!(tenant_key.as_str(), "acme:svc.A/Get");
        assert_eq!(tenant_key.tenant(), "acme");

        let (other_key, _) = extract(&snap, "svc.A/Get", &RequestContext::for_tenant("b"));
        assert_eq!(other_key.as_str(), "svc.A/Get");
        assert_ne!(tenant_key, other_key);
    }

    #[test]
    fn covered_match_attributes_are_not_repeated() {
        let mut rule = PolicyRule::new("svc.A/");
        rule.key_attributes = vec!["x-tenant-id".into()];
        rule.match_attributes
            .insert("x-tenant-id".into(), "acme".into());
        let snap = snapshot(vec![rule]);

        let (key, _) = extract(&snap, "svc.A/Get", &RequestContext::for_tenant("acme"));
        assert_eq!(key.as_str(), "acme:svc.A/Get");
    }

    #[test]
    fn extraction_is_deterministic() {
        let snap = snapshot(vec![PolicyRule::new("a/")]);
        let ctx = RequestContext::for_tenant("t");
        assert_eq!(extract(&snap, "a/B", &ctx).0, extract(&snap, "a/B", &ctx).0);
    }
}
