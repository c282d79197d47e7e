//! Guardrail core: request context carrier, operation keys, and command events.

pub mod context;
pub mod types;

pub use context::{ContextBuilder, ContextCarrier, ContextData};
pub use types::{EventType, OperationKey, Principal};
