//! Per-key rate limiting.
//!
//! # Data Flow
//! ```text
//! (key, quota, token cost)
//!     → registry.rs (find or create the key's bucket)
//!     → bucket.rs (refill from elapsed time, then consume)
//!     → Admitted | Rejected
//! ```
//!
//! # Design Decisions
//! - Refill is computed at acquisition time; there is no background timer
//! - Refill-then-consume runs under the key's own lock
//! - A rejected acquisition consumes nothing

pub mod bucket;
pub mod registry;

pub use bucket::TokenBucket;
pub use registry::{Admission, RateLimiterRegistry};
