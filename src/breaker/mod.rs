//! Per-key circuit breaking.
//!
//! # Data Flow
//! ```text
//! try_acquire(key, thresholds)
//!     → registry.rs (find or create the key's breaker)
//!     → machine.rs (lazy cooldown / probe checks, admit or reject)
//!     → BreakerPermit { ticket, probe } | BreakerRejection
//!
//! complete(permit, outcome, elapsed)
//!     → machine.rs (epoch + ticket check, window update, trip/close)
//!     → transitions reported to EventDispatcher
//! ```
//!
//! # Design Decisions
//! - Per-key breaker, independent locks
//! - Fail fast while open; cooldown evaluated on the next attempt
//! - Bounded concurrent probes while half-open
//! - A poisoned breaker resets to closed rather than failing calls

pub mod machine;
pub mod registry;
pub mod state;
pub mod window;

pub use machine::{Acquire, CircuitBreaker, Denial, Recorded, Ticket};
pub use registry::{BreakerAdmission, BreakerPermit, BreakerRejection, CircuitBreakerRegistry};
pub use state::{CircuitState, Transition};
pub use window::SlidingWindow;
