//! Protected command execution.
//!
//! A command is a call to an unreliable dependency identified by an
//! [`OperationKey`](guardrail_core::OperationKey). Each key gets its own
//! [`Bulkhead`] and [`CircuitBreaker`], created on first use from the
//! configuration the registry's properties strategy supplies.
//!
//! - [`config`]: per-key settings and validation
//! - [`stats`]: rolling-window outcome counts
//! - [`breaker`]: the closed/open/half-open state machine
//! - [`bulkhead`]: bounded workers with a bounded queue
//! - [`executor`]: the call pipeline, timeout, and fallback
//! - [`layer`]: the same pipeline as a tower layer

pub mod breaker;
pub mod bulkhead;
pub mod config;
pub mod error;
pub mod executor;
pub mod layer;
pub mod outcome;
pub mod stats;

pub use breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use bulkhead::{Bulkhead, BulkheadMetrics, BulkheadRejected, Work};
pub use config::{BreakerConfig, BulkheadConfig, CommandConfig, ConfigError};
pub use error::{CommandError, FailureKind};
pub use executor::CommandExecutor;
pub use layer::{CommandLayer, CommandService, LayerFallback};
pub use outcome::Outcome;
pub use stats::{BucketCounts, HealthCounts, RollingStats};
