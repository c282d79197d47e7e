use std::time::Duration;

use serde::Deserialize;

/// Per-operation configuration for the bulkhead, circuit breaker, and
/// execution timeout.
///
/// Field names deserialize from camelCase (`coreSize`, `sleepWindowMs`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandConfig {
    /// Number of workers that may execute concurrently.
    pub core_size: usize,
    /// Number of submissions that may wait for a worker. 0 disables queuing.
    pub max_queue_size: usize,
    /// Minimum calls in the rolling window before the breaker may trip.
    pub request_volume_threshold: u64,
    /// Error percentage (0..=100) at or above which the breaker trips.
    pub error_threshold_percentage: u64,
    /// Time the breaker stays open before a trial call is allowed.
    pub sleep_window_ms: u64,
    /// Duration of the rolling statistics window.
    pub rolling_window_ms: u64,
    /// Number of buckets the rolling window is divided into.
    pub num_buckets: usize,
    /// Maximum time the caller waits for the protected operation.
    pub execution_timeout_ms: u64,
    pub execution_timeout_enabled: bool,
    /// Abort the worker when the caller times out instead of letting it finish.
    pub interrupt_on_timeout: bool,
    pub circuit_breaker_enabled: bool,
    /// Reject every call regardless of health.
    pub force_open: bool,
    /// Permit every call regardless of health. Statistics are still tracked.
    pub force_closed: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            core_size: 10,
            max_queue_size: 0,
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            sleep_window_ms: 5_000,
            rolling_window_ms: 10_000,
            num_buckets: 10,
            execution_timeout_ms: 1_000,
            execution_timeout_enabled: true,
            interrupt_on_timeout: false,
            circuit_breaker_enabled: true,
            force_open: false,
            force_closed: false,
        }
    }
}

impl CommandConfig {
    /// Checks the configuration for values no component can work with.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_size == 0 {
            return Err(ConfigError::ZeroCoreSize);
        }
        if self.num_buckets == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if self.rolling_window_ms == 0 || self.rolling_window_ms % self.num_buckets as u64 != 0 {
            return Err(ConfigError::UnevenWindow {
                rolling_window_ms: self.rolling_window_ms,
                num_buckets: self.num_buckets,
            });
        }
        if self.error_threshold_percentage > 100 {
            return Err(ConfigError::PercentageOutOfRange(
                self.error_threshold_percentage,
            ));
        }
        if self.execution_timeout_enabled && self.execution_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.force_open && self.force_closed {
            return Err(ConfigError::ConflictingForce);
        }
        Ok(())
    }

    #[must_use]
    pub fn bulkhead(&self) -> BulkheadConfig {
        BulkheadConfig {
            core_size: self.core_size,
            max_queue_size: self.max_queue_size,
        }
    }

    #[must_use]
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            enabled: self.circuit_breaker_enabled,
            request_volume_threshold: self.request_volume_threshold,
            error_threshold_percentage: self.error_threshold_percentage,
            sleep_window: Duration::from_millis(self.sleep_window_ms),
            rolling_window: Duration::from_millis(self.rolling_window_ms),
            num_buckets: self.num_buckets,
            force_open: self.force_open,
            force_closed: self.force_closed,
        }
    }

    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

/// Worker and queue bounds for one bulkhead. Fixed once the bulkhead exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadConfig {
    pub core_size: usize,
    pub max_queue_size: usize,
}

impl BulkheadConfig {
    /// Maximum number of submissions held at once (running plus queued).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core_size + self.max_queue_size
    }
}

/// Circuit breaker thresholds and rolling window shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub enabled: bool,
    pub request_volume_threshold: u64,
    pub error_threshold_percentage: u64,
    pub sleep_window: Duration,
    pub rolling_window: Duration,
    pub num_buckets: usize,
    pub force_open: bool,
    pub force_closed: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        CommandConfig::default().breaker()
    }
}

/// Invalid command configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("coreSize must be at least 1")]
    ZeroCoreSize,
    #[error("numBuckets must be at least 1")]
    ZeroBuckets,
    #[error("rollingWindowMs ({rolling_window_ms}) must be a positive multiple of numBuckets ({num_buckets})")]
    UnevenWindow {
        rolling_window_ms: u64,
        num_buckets: usize,
    },
    #[error("errorThresholdPercentage must be within 0..=100, got {0}")]
    PercentageOutOfRange(u64),
    #[error("executionTimeoutMs must be positive when the timeout is enabled")]
    ZeroTimeout,
    #[error("forceOpen and forceClosed cannot both be set")]
    ConflictingForce,
    #[error("malformed properties: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CommandConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.core_size, 10);
        assert_eq!(config.max_queue_size, 0);
        assert_eq!(config.request_volume_threshold, 20);
        assert_eq!(config.error_threshold_percentage, 50);
        assert_eq!(config.execution_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let json = r#"{"coreSize":30,"maxQueueSize":10,"sleepWindowMs":7000,"numBuckets":5,"rollingWindowMs":15000}"#;
        let config: CommandConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.core_size, 30);
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.breaker().sleep_window, Duration::from_secs(7));
        assert_eq!(config.request_volume_threshold, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_core_size() {
        let config = CommandConfig {
            core_size: 0,
            ..CommandConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCoreSize));
    }

    #[test]
    fn rejects_window_not_divisible_into_buckets() {
        let config = CommandConfig {
            rolling_window_ms: 10_000,
            num_buckets: 3,
            ..CommandConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnevenWindow { num_buckets: 3, .. })
        ));
    }

    #[test]
    fn rejects_conflicting_force_flags() {
        let config = CommandConfig {
            force_open: true,
            force_closed: true,
            ..CommandConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ConflictingForce));
    }

    #[test]
    fn rejects_percentage_above_hundred() {
        let config = CommandConfig {
            error_threshold_percentage: 101,
            ..CommandConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::PercentageOutOfRange(101)));
    }

    #[test]
    fn bulkhead_capacity_sums_workers_and_queue() {
        let config = CommandConfig {
            core_size: 2,
            max_queue_size: 1,
            ..CommandConfig::default()
        };
        assert_eq!(config.bulkhead().capacity(), 3);
    }
}
