//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guard, breaker registry produce:
//!     → events.rs (EventDispatcher → GuardEvents sinks)
//!         → TracingEvents → logging.rs subscriber
//!         → MetricsEvents → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Hooks never fail the call that produced them

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{
    EventDispatcher, GuardEvents, MetricsEvents, TracingEvents, DEFAULT_TENANT_LABELS, OVERFLOW_TENANT,
};
