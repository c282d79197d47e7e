//! Pluggable policies consulted by the command executor.
//!
//! - [`concurrency`]: bulkhead factory and work wrapping (context propagation)
//! - [`metrics`]: event counters and latency through the `metrics` facade
//! - [`hook`]: execution hooks and event notifiers
//! - [`properties`]: per-key configuration lookup
//! - [`registry`]: the immutable policy set and its atomic holder

pub mod concurrency;
pub mod hook;
pub mod metrics;
pub mod properties;
pub mod registry;

pub use concurrency::{ConcurrencyStrategy, ContextPropagatingStrategy, DefaultConcurrencyStrategy};
pub use hook::{EventNotifier, ExecutionHook, NoopExecutionHook, TracingEventNotifier};
pub use metrics::{FacadeMetricsPublisher, MetricsPublisher, NoopMetricsPublisher};
pub use properties::{PropertiesStrategy, StaticProperties};
pub use registry::{Plugins, RegistryError, StrategyRegistry, StrategyRegistryBuilder};
