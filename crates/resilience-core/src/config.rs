//! Circuit breaker configuration.
//!
//! One immutable [`CircuitBreakerConfig`] is attached to each breaker at
//! creation. Presets exist for the service classes the backend talks to;
//! anything file-driven goes through [`crate::settings`] instead.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Classifies which service errors count against the breaker.
///
/// Rendered as a predicate rather than an error-type list so callers can
/// exempt errors (validation rejections, client-side cancellations) that say
/// nothing about the health of the downstream service.
pub type FailurePredicate = Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip the circuit open.
    pub failure_threshold: u32,
    /// Time the circuit must stay open before a recovery probe is allowed.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Per-call deadline.
    pub call_timeout: Duration,
    /// Maximum calls allowed in flight at once.
    pub max_concurrent_calls: u32,
    /// Failure rate (0.0-1.0) above which an alert log fires.
    pub alert_threshold: f64,
    /// Reserved for windowed failure-rate calculation. The current rate is
    /// lifetime-cumulative and this knob is not consulted.
    pub monitor_window: Duration,
    /// Which service errors count as breaker failures.
    pub is_failure: FailurePredicate,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            call_timeout: Duration::from_secs(30),
            max_concurrent_calls: 10,
            alert_threshold: 0.5,
            monitor_window: Duration::from_secs(300),
            is_failure: Arc::new(|_| true),
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("success_threshold", &self.success_threshold)
            .field("call_timeout", &self.call_timeout)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("alert_threshold", &self.alert_threshold)
            .field("monitor_window", &self.monitor_window)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerConfig {
    /// Configuration tuned for model-provider APIs.
    ///
    /// Slow upstream: generous deadline, trips after fewer failures, longer
    /// recovery window before probing.
    #[must_use]
    pub fn model_provider() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
            call_timeout: Duration::from_secs(60),
            max_concurrent_calls: 4,
            ..Self::default()
        }
    }

    /// Configuration tuned for cache backends.
    ///
    /// Fast local dependency: tight deadline, tolerates more blips, probes
    /// again quickly.
    #[must_use]
    pub fn cache() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(2),
            max_concurrent_calls: 64,
            ..Self::default()
        }
    }

    /// Replace the failure classifier.
    #[must_use]
    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(predicate);
        self
    }

    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a threshold, deadline, or the
    /// concurrency cap is zero, or `alert_threshold` is outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "failure_threshold",
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "success_threshold",
            });
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrent_calls",
            });
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "call_timeout",
            });
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            return Err(ConfigError::AlertThresholdOutOfRange(self.alert_threshold));
        }
        Ok(())
    }
}

/// Invalid circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A field that must be positive was zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Name of the offending field.
        field: &'static str,
    },

    /// `alert_threshold` is not a valid rate.
    #[error("alert_threshold must be within 0.0..=1.0, got {0}")]
    AlertThresholdOutOfRange(f64),
}
