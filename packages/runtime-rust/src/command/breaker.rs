//! Circuit breaker state machine.
//!
//! State machine: Closed -> Open -> `HalfOpen` -> (Closed | Open)
//!
//! The breaker never polls. An open circuit moves to `HalfOpen` only when a
//! call arrives after the sleep window has elapsed, and exactly one trial
//! call is admitted while half-open.

use std::fmt;
use std::sync::Arc;

use guardrail_core::{EventType, OperationKey};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::config::BreakerConfig;
use super::stats::{BucketCounts, HealthCounts, RollingStats};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Machine {
    state: CircuitState,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-key circuit breaker with rolling health statistics.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: OperationKey,
    config: BreakerConfig,
    stats: RollingStats,
    machine: Mutex<Machine>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(key: OperationKey, config: BreakerConfig) -> Self {
        let stats = RollingStats::new(config.rolling_window, config.num_buckets);
        Self {
            key,
            config,
            stats,
            machine: Mutex::new(Machine {
                state: CircuitState::Closed,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.machine.lock().state
    }

    /// Counts in the current rolling window.
    #[must_use]
    pub fn stats(&self) -> BucketCounts {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn health(&self) -> HealthCounts {
        self.stats.snapshot().health()
    }

    /// Asks to let one call through.
    ///
    /// Returns `None` when the call must be short-circuited. The returned
    /// permit must be completed with the call's outcome; a permit dropped
    /// without an outcome counts as a failed trial when it was the trial.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        if self.config.force_open {
            return None;
        }
        if self.config.force_closed || !self.config.enabled {
            return Some(self.permit(false));
        }

        let mut machine = self.machine.lock();
        match machine.state {
            CircuitState::Closed => Some(self.permit(false)),
            CircuitState::Open => {
                let now = Instant::now();
                let elapsed = machine
                    .opened_at
                    .is_none_or(|opened| now.saturating_duration_since(opened) >= self.config.sleep_window);
                if !elapsed {
                    return None;
                }
                machine.state = CircuitState::HalfOpen;
                machine.trial_in_flight = true;
                tracing::info!(key = %self.key, "circuit half-open, admitting trial call");
                Some(self.permit(true))
            }
            CircuitState::HalfOpen => {
                if machine.trial_in_flight {
                    return None;
                }
                machine.trial_in_flight = true;
                Some(self.permit(true))
            }
        }
    }

    /// Records an event that did not go through a permit, such as a
    /// short-circuit or a fallback result.
    pub fn record(&self, event: EventType) {
        self.stats.record(event);
    }

    /// Forces the breaker closed with a fresh window.
    pub fn reset(&self) {
        let mut machine = self.machine.lock();
        self.close(&mut machine);
    }

    fn permit(self: &Arc<Self>, trial: bool) -> CallPermit {
        CallPermit {
            breaker: Arc::clone(self),
            trial,
            completed: false,
        }
    }

    fn on_outcome(&self, trial: bool, event: EventType) {
        self.stats.record(event);

        let mut machine = self.machine.lock();
        if trial {
            machine.trial_in_flight = false;
            if event == EventType::Success {
                self.close(&mut machine);
            } else {
                self.open(&mut machine, event);
            }
            return;
        }

        if machine.state != CircuitState::Closed || !self.config.enabled || self.config.force_closed {
            return;
        }
        let health = self.stats.snapshot().health();
        if health.total >= self.config.request_volume_threshold
            && health.error_percentage >= self.config.error_threshold_percentage
        {
            tracing::warn!(
                key = %self.key,
                total = health.total,
                error_percentage = health.error_percentage,
                "error threshold exceeded"
            );
            self.open(&mut machine, event);
        }
    }

    fn open(&self, machine: &mut Machine, event: EventType) {
        machine.state = CircuitState::Open;
        machine.opened_at = Some(Instant::now());
        tracing::warn!(
            key = %self.key,
            event = %event,
            sleep_window_ms = u64::try_from(self.config.sleep_window.as_millis()).unwrap_or(u64::MAX),
            "circuit opened"
        );
    }

    fn close(&self, machine: &mut Machine) {
        let was = machine.state;
        machine.state = CircuitState::Closed;
        machine.opened_at = None;
        machine.trial_in_flight = false;
        self.stats.reset();
        if was != CircuitState::Closed {
            tracing::info!(key = %self.key, "circuit closed");
        }
    }
}

// ---------------------------------------------------------------------------
// CallPermit
// ---------------------------------------------------------------------------

/// Admission ticket for one call, completed exactly once with its outcome.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    completed: bool,
}

impl CallPermit {
    /// Returns `true` if this call is the half-open trial.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records the outcome and applies any resulting state transition.
    pub fn complete(mut self, event: EventType) {
        self.completed = true;
        self.breaker.on_outcome(self.trial, event);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        // An abandoned trial must not leave the breaker half-open forever.
        if !self.completed && self.trial {
            let mut machine = self.breaker.machine.lock();
            machine.trial_in_flight = false;
            self.breaker.open(&mut machine, EventType::Failure);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
