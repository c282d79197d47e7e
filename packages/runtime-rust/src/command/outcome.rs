use super::error::FailureKind;

/// Result of a successful command execution.
///
/// A substituted fallback value stays distinguishable from a genuine result
/// so callers can react to degraded data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The protected operation produced the value.
    Primary(T),
    /// The fallback produced the value after the protected operation could
    /// not complete.
    Fallback { value: T, cause: FailureKind },
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Why the fallback ran, if it did.
    #[must_use]
    pub fn fallback_cause(&self) -> Option<FailureKind> {
        match self {
            Self::Primary(_) => None,
            Self::Fallback { cause, .. } => Some(*cause),
        }
    }

    #[must_use]
    pub fn value(&self) -> &T {
        match self {
            Self::Primary(value) | Self::Fallback { value, .. } => value,
        }
    }

    /// Discards the marker and returns the value.
    pub fn into_inner(self) -> T {
        match self {
            Self::Primary(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Primary(value) => Outcome::Primary(f(value)),
            Self::Fallback { value, cause } => Outcome::Fallback {
                value: f(value),
                cause,
            },
        }
    }
}
