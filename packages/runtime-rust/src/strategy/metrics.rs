//! Metrics publishers for command events and latency.

use std::fmt;
use std::time::Duration;

use guardrail_core::{EventType, OperationKey};

/// Receives every command event and each execution's latency.
pub trait MetricsPublisher: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn publish_event(&self, key: &OperationKey, event: EventType);

    /// Wall time from submission to the primary outcome, fallback excluded.
    fn publish_latency(&self, key: &OperationKey, elapsed: Duration) {
        let _ = (key, elapsed);
    }
}

/// Publishes through the `metrics` facade. Without an installed recorder
/// the calls are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetricsPublisher;

impl MetricsPublisher for FacadeMetricsPublisher {
    fn name(&self) -> &'static str {
        "metrics-facade"
    }

    fn publish_event(&self, key: &OperationKey, event: EventType) {
        metrics::counter!(
            "guardrail_command_events_total",
            "key" => key.to_string(),
            "event" => event.as_str(),
        )
        .increment(1);
    }

    fn publish_latency(&self, key: &OperationKey, elapsed: Duration) {
        metrics::histogram!("guardrail_command_latency_ms", "key" => key.to_string())
            .record(elapsed.as_secs_f64() * 1000.0);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsPublisher;

impl MetricsPublisher for NoopMetricsPublisher {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn publish_event(&self, _key: &OperationKey, _event: EventType) {}
}
