//! Guardrail runtime: resilient execution of calls to unreliable dependencies.
//!
//! Calls run under a per-key bulkhead and circuit breaker with an optional
//! timeout and fallback. Request context (correlation id, credentials,
//! principal) follows a call onto its worker when context propagation is
//! installed in the [`strategy::Plugins`] holder.

pub mod command;
pub mod context;
pub mod strategy;

pub use command::{CommandConfig, CommandError, CommandExecutor, Outcome};
pub use strategy::{Plugins, StrategyRegistry};
