//! RPC guard library: per-key rate limiting and circuit breaking for RPC calls.

pub mod breaker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod key;
pub mod observability;
pub mod ratelimit;
pub mod registry;

pub use classify::{CallStatus, Code, Outcome, OutcomeClassifier};
pub use config::{GuardConfig, SnapshotHandle};
pub use context::{ContextLookup, RequestContext};
pub use error::{GuardError, RejectReason, Rejection};
pub use interceptor::{CallPermit, Guard, GuardLayer};
pub use key::CallKey;
