//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → snapshot.rs (compile rules into PolicySnapshot)
//!     → SnapshotHandle (ArcSwap, read lock-free on every call)
//!
//! On reload:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<PolicySnapshot>
//!     → new calls resolve against the new snapshot
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable once compiled; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A rejected reload keeps the current snapshot

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BreakerThresholds, CircuitBreakerConfig, ClassifierConfig, Concern, GuardConfig,
    ObservabilityConfig, Partition, PolicyRule, Quota, RateLimitConfig, RegistryConfig,
};
pub use snapshot::{Policy, PolicySnapshot, SnapshotHandle};
pub use validation::{validate_config, ValidationError};
pub use watcher::{spawn_reloader, ConfigSource, ConfigWatcher, FileSource};
