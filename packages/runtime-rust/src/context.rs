//! Request context propagation across the bulkhead boundary.
//!
//! The active [`ContextCarrier`] lives in a task-local slot. It is only ever
//! installed through a scope that owns the work being run, so the carrier is
//! removed when the work returns, fails, panics, or is dropped mid-flight.
//! Pooled workers therefore never observe a previous call's context.

use std::future::Future;

use guardrail_core::ContextCarrier;
use tokio::task::futures::TaskLocalFuture;

tokio::task_local! {
    static CURRENT: ContextCarrier;
}

/// Returns the carrier installed for the calling task, or
/// [`ContextCarrier::empty`] when none is installed.
#[must_use]
pub fn capture() -> ContextCarrier {
    CURRENT.try_with(ContextCarrier::clone).unwrap_or_default()
}

/// Returns `true` if the calling task has a carrier installed.
#[must_use]
pub fn is_installed() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Runs inbound request `work` with `carrier` installed.
///
/// This is the entry point for the request path that builds the carrier
/// (for example from a correlation-id header).
pub async fn scope<F: Future>(carrier: ContextCarrier, work: F) -> F::Output {
    CURRENT.scope(carrier, work).await
}

/// Wraps `work` so that it runs with `carrier` installed on whichever worker
/// polls it.
///
/// The carrier is installed for the duration of each poll and removed when
/// the poll returns; it is dropped together with the wrapped work. The
/// submitting task's own context is not touched.
pub fn propagate<F: Future>(carrier: ContextCarrier, work: F) -> TaskLocalFuture<ContextCarrier, F> {
    CURRENT.scope(carrier, work)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
