//! Error taxonomy for protected calls.
//!
//! The breaker never swallows a service error: it is recorded and handed
//! back unchanged. The breaker only substitutes its own error when the call
//! was not executed at all ([`CircuitBreakerError::CircuitOpen`],
//! [`CircuitBreakerError::ConcurrencyLimitExceeded`]) or was cut off at the
//! deadline ([`CircuitBreakerError::CallTimeout`]). Retry and fallback
//! policy belong to the caller.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a protected call that did not return a value.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E: std::error::Error> {
    /// The circuit is open and not yet eligible for a recovery probe. The
    /// wrapped work was never invoked.
    #[error("circuit breaker for '{service}' is open; last failure: {last_failure}")]
    CircuitOpen {
        /// Service the breaker protects.
        service: String,
        /// Description of the most recent recorded failure.
        last_failure: String,
    },

    /// The wrapped work ran but exceeded the per-call deadline.
    #[error("call to '{service}' timed out after {timeout:?}")]
    CallTimeout {
        /// Service the breaker protects.
        service: String,
        /// The configured deadline.
        timeout: Duration,
    },

    /// Rejected at admission: the concurrency cap was reached. Does not
    /// count against the breaker's failure accounting.
    #[error("too many concurrent calls to '{service}' ({limit} in flight)")]
    ConcurrencyLimitExceeded {
        /// Service the breaker protects.
        service: String,
        /// The configured cap.
        limit: u32,
    },

    /// The wrapped work failed. Recorded, then passed through unchanged.
    #[error(transparent)]
    Service(#[from] E),
}

impl<E: std::error::Error> CircuitBreakerError<E> {
    /// Whether the call was rejected without the work being invoked.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::ConcurrencyLimitExceeded { .. }
        )
    }

    /// Whether the call was cut off at the deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. })
    }

    /// Extract the underlying service error, if that is what this is.
    #[must_use]
    pub fn into_service_error(self) -> Option<E> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }
}
