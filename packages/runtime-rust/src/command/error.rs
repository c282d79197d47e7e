use std::fmt;

use guardrail_core::OperationKey;

use super::config::ConfigError;

/// Which recoverable failure stopped the protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ShortCircuited,
    Rejected,
    Timeout,
    OperationFailed,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShortCircuited => "short-circuited",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::OperationFailed => "failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`CommandExecutor`](super::CommandExecutor).
///
/// The first four variants are recovered by a fallback when one is
/// configured. `FallbackFailed` and `Config` always reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("circuit for {key} is open, call short-circuited")]
    ShortCircuited { key: OperationKey },
    #[error("bulkhead for {key} is full, call rejected")]
    Rejected { key: OperationKey },
    #[error("{key} timed out after {timeout_ms}ms")]
    Timeout { key: OperationKey, timeout_ms: u64 },
    #[error("{key} failed: {source}")]
    OperationFailed {
        key: OperationKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("fallback for {key} failed after the call was {cause}: {source}")]
    FallbackFailed {
        key: OperationKey,
        cause: FailureKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid configuration for {key}: {source}")]
    Config {
        key: OperationKey,
        #[source]
        source: ConfigError,
    },
}

impl CommandError {
    /// The recoverable failure kind, or `None` for errors a fallback never handles.
    #[must_use]
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::ShortCircuited { .. } => Some(FailureKind::ShortCircuited),
            Self::Rejected { .. } => Some(FailureKind::Rejected),
            Self::Timeout { .. } => Some(FailureKind::Timeout),
            Self::OperationFailed { .. } => Some(FailureKind::OperationFailed),
            Self::FallbackFailed { .. } | Self::Config { .. } => None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &OperationKey {
        match self {
            Self::ShortCircuited { key }
            | Self::Rejected { key }
            | Self::Timeout { key, .. }
            | Self::OperationFailed { key, .. }
            | Self::FallbackFailed { key, .. }
            | Self::Config { key, .. } => key,
        }
    }
}
