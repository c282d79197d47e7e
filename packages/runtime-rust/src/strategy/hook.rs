//! Execution hooks and event notifiers.

use std::fmt;

use guardrail_core::{EventType, OperationKey};

use crate::command::error::CommandError;

/// Callbacks around each stage of a command execution. All methods default
/// to no-ops.
pub trait ExecutionHook: Send + Sync + fmt::Debug {
    fn on_start(&self, key: &OperationKey) {
        let _ = key;
    }

    fn on_success(&self, key: &OperationKey) {
        let _ = key;
    }

    /// The protected operation could not complete; a fallback may follow.
    fn on_error(&self, key: &OperationKey, error: &CommandError) {
        let _ = (key, error);
    }

    fn on_fallback_start(&self, key: &OperationKey) {
        let _ = key;
    }

    fn on_fallback_success(&self, key: &OperationKey) {
        let _ = key;
    }

    fn on_fallback_error(&self, key: &OperationKey, error: &anyhow::Error) {
        let _ = (key, error);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutionHook;

impl ExecutionHook for NoopExecutionHook {}

/// Notified of every event as it is recorded.
pub trait EventNotifier: Send + Sync + fmt::Debug {
    fn mark_event(&self, key: &OperationKey, event: EventType);
}

/// Emits each event as a `trace` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventNotifier;

impl EventNotifier for TracingEventNotifier {
    fn mark_event(&self, key: &OperationKey, event: EventType) {
        tracing::trace!(key = %key, event = %event, "command event");
    }
}
