//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define guard metrics (rejections, transitions, outcomes, live keys)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `rpc_guard_rejections_total` (counter): rejected calls by reason, tenant
//! - `rpc_guard_state_transitions_total` (counter): breaker transitions by from, to
//! - `rpc_guard_outcomes_total` (counter): classified call outcomes
//! - `rpc_guard_registry_keys` (gauge): live keys per registry
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are low-cardinality; `tenant` follows the key prefix and is
//!   capped by `MetricsEvents` before it reaches these recorders

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::breaker::CircuitState;
use crate::classify::Outcome;
use crate::error::RejectReason;

pub const REJECTIONS_TOTAL: &str = "rpc_guard_rejections_total";
pub const STATE_TRANSITIONS_TOTAL: &str = "rpc_guard_state_transitions_total";
pub const OUTCOMES_TOTAL: &str = "rpc_guard_outcomes_total";
pub const REGISTRY_KEYS: &str = "rpc_guard_registry_keys";

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_rejection(reason: RejectReason, tenant: &str) {
    metrics::counter!(
        REJECTIONS_TOTAL,
        "reason" => reason.as_str(),
        "tenant" => tenant.to_string()
    )
    .increment(1);
}

pub fn record_transition(from: CircuitState, to: CircuitState) {
    metrics::counter!(
        STATE_TRANSITIONS_TOTAL,
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_outcome(outcome: Outcome) {
    metrics::counter!(OUTCOMES_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_registry_size(registry: &'static str, keys: usize) {
    metrics::gauge!(REGISTRY_KEYS, "registry" => registry).set(keys as f64);
}
