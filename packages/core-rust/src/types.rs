use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Authenticated principal attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

impl Principal {
    /// Returns `true` if the principal carries `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Stable name of a logical protected operation.
///
/// Selects exactly one bulkhead and one circuit breaker. Cloning is cheap:
/// the name is shared behind an `Arc`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationKey(Arc<str>);

impl OperationKey {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationKey({})", self.0)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for OperationKey {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for OperationKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Events emitted for every command execution, consumed by metrics
/// publishers and event notifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Protected operation returned a value.
    Success,
    /// Protected operation returned an error or panicked.
    Failure,
    /// Protected operation did not finish within the execution timeout.
    Timeout,
    /// Circuit breaker denied the call.
    ShortCircuited,
    /// Bulkhead was full.
    Rejected,
    /// Fallback produced a substitute value.
    FallbackSuccess,
    /// Fallback itself failed.
    FallbackFailure,
    /// Call failed and no fallback was configured.
    FallbackMissing,
    /// A timed-out worker finished after its caller gave up.
    LateCompletion,
}

impl EventType {
    /// Stable lowercase name used as a metric label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::ShortCircuited => "short_circuited",
            Self::Rejected => "rejected",
            Self::FallbackSuccess => "fallback_success",
            Self::FallbackFailure => "fallback_failure",
            Self::FallbackMissing => "fallback_missing",
            Self::LateCompletion => "late_completion",
        }
    }

    /// Returns `true` for events that count against breaker health.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
