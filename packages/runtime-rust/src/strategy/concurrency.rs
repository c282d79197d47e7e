//! Concurrency strategies: how bulkheads are built and how work is wrapped
//! before it crosses onto a worker.

use std::fmt;
use std::sync::Arc;

use guardrail_core::{ContextCarrier, OperationKey};

use crate::command::bulkhead::{Bulkhead, Work};
use crate::command::config::BulkheadConfig;
use crate::context;

/// Pluggable thread-pool factory and work wrapper.
pub trait ConcurrencyStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Builds the bulkhead for `key`. Called once per key.
    fn create_bulkhead(&self, key: &OperationKey, config: BulkheadConfig) -> Bulkhead {
        Bulkhead::new(key.clone(), config)
    }

    /// Wraps `work` before it is submitted. `carrier` is the submitter's
    /// context at submission time.
    fn wrap(&self, work: Work, carrier: &ContextCarrier) -> Work {
        let _ = carrier;
        work
    }
}

/// Plain bulkheads, work submitted unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConcurrencyStrategy;

impl ConcurrencyStrategy for DefaultConcurrencyStrategy {
    fn name(&self) -> &'static str {
        "default"
    }
}

/// Installs the submitter's carrier around every unit of work, then hands
/// the result to the previously registered strategy.
///
/// Every other behavior is delegated to `previous` when one exists, so
/// wrappers that strategy applies (security context handling, tracing) keep
/// running.
#[derive(Debug, Clone)]
pub struct ContextPropagatingStrategy {
    previous: Option<Arc<dyn ConcurrencyStrategy>>,
}

impl ContextPropagatingStrategy {
    #[must_use]
    pub fn new(previous: Option<Arc<dyn ConcurrencyStrategy>>) -> Self {
        Self { previous }
    }

    #[must_use]
    pub fn previous(&self) -> Option<&Arc<dyn ConcurrencyStrategy>> {
        self.previous.as_ref()
    }
}

impl ConcurrencyStrategy for ContextPropagatingStrategy {
    fn name(&self) -> &'static str {
        "context-propagating"
    }

    fn create_bulkhead(&self, key: &OperationKey, config: BulkheadConfig) -> Bulkhead {
        match &self.previous {
            Some(previous) => previous.create_bulkhead(key, config),
            None => Bulkhead::new(key.clone(), config),
        }
    }

    fn wrap(&self, work: Work, carrier: &ContextCarrier) -> Work {
        tracing::debug!(
            correlation_id = carrier.correlation_id().unwrap_or("-"),
            "wrapping work with request context"
        );
        let wrapped: Work = Box::pin(context::propagate(carrier.clone(), work));
        match &self.previous {
            Some(previous) => previous.wrap(wrapped, carrier),
            None => wrapped,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
