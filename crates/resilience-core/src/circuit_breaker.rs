//! Circuit breaker for external service resilience.
//!
//! Prevents cascading failures when external services (model providers,
//! cache backends, webhook targets) become unavailable or unresponsive.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= threshold)
//! OPEN → HALF_OPEN (recovery timeout elapsed, checked at admission)
//! HALF_OPEN → CLOSED (consecutive successes >= threshold)
//! HALF_OPEN → OPEN (any recorded failure)
//! ```
//!
//! # Protected calls
//!
//! A call is admitted in a single critical section: the concurrency cap is
//! checked first, then the state gate (an open circuit either rejects the
//! call or, once the recovery timeout has elapsed, flips to half-open and
//! lets the probe through). The wrapped work then runs outside the lock
//! under the configured deadline, and its outcome is recorded afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! use resilience_core::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("model-provider", CircuitBreakerConfig::model_provider());
//!
//! let completion = breaker
//!     .call(|| async { provider.complete(request).await })
//!     .await?;
//! ```

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;
use crate::observability::metrics;
use crate::stats::{CircuitBreakerStats, StateChange};

/// Minimum spacing between alert log emissions for one breaker.
const ALERT_INTERVAL: Duration = Duration::from_secs(300);

/// Number of transition records included in a snapshot.
const SNAPSHOT_STATE_CHANGES: usize = 10;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is testing recovery with live traffic.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// All mutable breaker state, guarded by one mutex.
#[derive(Debug)]
struct Shared {
    state: CircuitState,
    state_changed_at: Instant,
    state_changed_at_utc: DateTime<Utc>,
    stats: CircuitBreakerStats,
    active_calls: u32,
    last_alert_at: Option<Instant>,
}

/// Circuit breaker for calls to one named external service.
///
/// Cheap to share: wrap in an `Arc` and clone the handle. The lock is held
/// only for admission and bookkeeping, never while the wrapped work runs,
/// so concurrent calls do not serialize on each other.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    shared: Mutex<Shared>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service_name: service_name.into(),
            config,
            shared: Mutex::new(Shared {
                state: CircuitState::Closed,
                state_changed_at: Instant::now(),
                state_changed_at_utc: Utc::now(),
                stats: CircuitBreakerStats::new(),
                active_calls: 0,
                last_alert_at: None,
            }),
        }
    }

    /// The service this breaker protects.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Calls currently in flight.
    #[must_use]
    pub fn active_calls(&self) -> u32 {
        self.lock().active_calls
    }

    /// Whether a call would currently be admitted.
    ///
    /// Non-mutating preview; admission itself happens inside [`Self::call`]
    /// so that racing callers cannot both claim the same slot.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let shared = self.lock();
        if shared.active_calls >= self.config.max_concurrent_calls {
            return false;
        }
        match shared.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                shared.state_changed_at.elapsed() >= self.config.recovery_timeout
            }
        }
    }

    /// Run `work` through the breaker.
    ///
    /// Admission, the per-call deadline, and outcome recording follow the
    /// module-level description. The underlying error is handed back
    /// unchanged; the breaker only substitutes its own error when the work
    /// was never invoked or was cut off at the deadline.
    ///
    /// # Errors
    ///
    /// - [`CircuitBreakerError::ConcurrencyLimitExceeded`] when the cap is
    ///   reached (no failure accounting).
    /// - [`CircuitBreakerError::CircuitOpen`] when the circuit is open and
    ///   not yet eligible for a probe.
    /// - [`CircuitBreakerError::CallTimeout`] when the deadline fires.
    /// - [`CircuitBreakerError::Service`] carrying the work's own error.
    pub async fn call<F, Fut, T, E>(&self, work: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.admit()?;
        // Releases the concurrency slot on every exit path, including
        // cancellation of this future.
        let _slot = ActiveCallSlot {
            shared: &self.shared,
        };

        let started = Instant::now();
        match tokio::time::timeout(self.config.call_timeout, work()).await {
            Ok(Ok(value)) => {
                self.on_success(started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                if (self.config.is_failure)(&err) {
                    self.on_failure(&err.to_string());
                } else {
                    tracing::debug!(
                        service = %self.service_name,
                        error = %err,
                        "Error exempted from failure accounting"
                    );
                }
                Err(CircuitBreakerError::Service(err))
            }
            Err(_) => {
                self.on_timeout();
                Err(CircuitBreakerError::CallTimeout {
                    service: self.service_name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Force the circuit closed and zero both run-length counters.
    ///
    /// Administrative control; normal recovery goes through the half-open
    /// probe path.
    pub fn reset(&self) {
        let mut shared = self.lock();
        self.transition_locked(&mut shared, CircuitState::Closed);
        shared.stats.consecutive_failures = 0;
        shared.stats.consecutive_successes = 0;
        tracing::info!(service = %self.service_name, "Circuit breaker manually reset");
    }

    /// Force the circuit open without touching the run-length counters.
    pub fn force_open(&self) {
        let mut shared = self.lock();
        self.transition_locked(&mut shared, CircuitState::Open);
        tracing::warn!(service = %self.service_name, "Circuit breaker forced open");
    }

    /// Immutable snapshot of state, counters, and recent transitions.
    ///
    /// Computed under the breaker lock, so the fields are mutually
    /// consistent.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerSnapshot {
        let shared = self.lock();
        CircuitBreakerSnapshot {
            service_name: self.service_name.clone(),
            state: shared.state,
            state_changed_at: shared.state_changed_at_utc,
            total_calls: shared.stats.total_calls,
            total_successes: shared.stats.total_successes,
            total_failures: shared.stats.total_failures,
            total_timeouts: shared.stats.total_timeouts,
            consecutive_failures: shared.stats.consecutive_failures,
            consecutive_successes: shared.stats.consecutive_successes,
            failure_rate: shared.stats.failure_rate(),
            avg_response_time: shared.stats.avg_response_time(),
            active_calls: shared.active_calls,
            last_failure_time: shared.stats.last_failure_time,
            last_success_time: shared.stats.last_success_time,
            last_error: shared.stats.last_error.clone(),
            config: ConfigSnapshot {
                failure_threshold: self.config.failure_threshold,
                recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
                success_threshold: self.config.success_threshold,
                call_timeout_secs: self.config.call_timeout.as_secs(),
                max_concurrent_calls: self.config.max_concurrent_calls,
                alert_threshold: self.config.alert_threshold,
                monitor_window_secs: self.config.monitor_window.as_secs(),
            },
            recent_state_changes: shared.stats.recent_state_changes(SNAPSHOT_STATE_CHANGES),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission: concurrency cap, then the state gate, as one critical
    /// section. Increments `active_calls` and `total_calls` on admission.
    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>>
    where
        E: std::error::Error,
    {
        let mut shared = self.lock();

        if shared.active_calls >= self.config.max_concurrent_calls {
            metrics::record_rejection(&self.service_name, "concurrency_limit");
            return Err(CircuitBreakerError::ConcurrencyLimitExceeded {
                service: self.service_name.clone(),
                limit: self.config.max_concurrent_calls,
            });
        }

        if shared.state == CircuitState::Open {
            if shared.state_changed_at.elapsed() >= self.config.recovery_timeout {
                self.transition_locked(&mut shared, CircuitState::HalfOpen);
            } else {
                let last_failure = shared
                    .stats
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no recorded failure".to_string());
                self.record_failure_locked(&mut shared, "circuit open");
                metrics::record_rejection(&self.service_name, "circuit_open");
                return Err(CircuitBreakerError::CircuitOpen {
                    service: self.service_name.clone(),
                    last_failure,
                });
            }
        }

        shared.active_calls += 1;
        shared.stats.record_call();
        Ok(())
    }

    fn on_success(&self, elapsed: Duration) {
        let mut shared = self.lock();
        shared.stats.record_success(elapsed);
        metrics::record_success(&self.service_name);
        if shared.state == CircuitState::HalfOpen
            && shared.stats.consecutive_successes >= self.config.success_threshold
        {
            self.transition_locked(&mut shared, CircuitState::Closed);
        }
    }

    fn on_failure(&self, reason: &str) {
        let mut shared = self.lock();
        self.record_failure_locked(&mut shared, reason);
    }

    fn on_timeout(&self) {
        let mut shared = self.lock();
        shared.stats.record_timeout();
        metrics::record_timeout(&self.service_name);
        let reason = format!("call timed out after {:?}", self.config.call_timeout);
        self.record_failure_locked(&mut shared, &reason);
    }

    /// Record a failure and apply the trip rule. Caller holds the lock.
    fn record_failure_locked(&self, shared: &mut Shared, reason: &str) {
        shared.stats.record_failure(reason);
        metrics::record_failure(&self.service_name);
        tracing::debug!(
            service = %self.service_name,
            reason,
            consecutive_failures = shared.stats.consecutive_failures,
            "Recorded failure"
        );

        let should_open = match shared.state {
            // A half-open circuit reopens on any failure: the probe showed
            // the dependency has not recovered.
            CircuitState::HalfOpen => true,
            CircuitState::Closed => {
                shared.stats.consecutive_failures >= self.config.failure_threshold
            }
            CircuitState::Open => false,
        };
        if should_open {
            self.transition_locked(shared, CircuitState::Open);
        }

        self.maybe_alert_locked(shared);
    }

    /// Move to `to`, logging and recording the transition. A transition to
    /// the current state is a no-op. Caller holds the lock.
    fn transition_locked(&self, shared: &mut Shared, to: CircuitState) {
        let from = shared.state;
        if from == to {
            return;
        }

        shared.state = to;
        shared.state_changed_at = Instant::now();
        shared.state_changed_at_utc = Utc::now();

        let change = StateChange {
            at: shared.state_changed_at_utc,
            from,
            to,
            consecutive_failures: shared.stats.consecutive_failures,
            total_failures: shared.stats.total_failures,
            total_calls: shared.stats.total_calls,
        };
        shared.stats.push_state_change(change);
        metrics::record_state(&self.service_name, to);

        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service_name,
                from = %from,
                to = %to,
                consecutive_failures = shared.stats.consecutive_failures,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                service = %self.service_name,
                from = %from,
                to = %to,
                "Circuit breaker probing for recovery"
            ),
            CircuitState::Closed => tracing::info!(
                service = %self.service_name,
                from = %from,
                to = %to,
                "Circuit breaker closed"
            ),
        }
    }

    /// Emit the failure-rate alert, at most once per [`ALERT_INTERVAL`].
    /// Caller holds the lock.
    fn maybe_alert_locked(&self, shared: &mut Shared) {
        let rate = shared.stats.failure_rate();
        if rate < self.config.alert_threshold {
            return;
        }
        let due = shared
            .last_alert_at
            .is_none_or(|at| at.elapsed() > ALERT_INTERVAL);
        if !due {
            return;
        }
        shared.last_alert_at = Some(Instant::now());
        tracing::error!(
            service = %self.service_name,
            failure_rate = rate,
            total_failures = shared.stats.total_failures,
            total_calls = shared.stats.total_calls,
            "Failure rate above alert threshold"
        );
    }
}

/// Releases a concurrency slot when dropped.
struct ActiveCallSlot<'a> {
    shared: &'a Mutex<Shared>,
}

impl Drop for ActiveCallSlot<'_> {
    fn drop(&mut self) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.active_calls = shared.active_calls.saturating_sub(1);
    }
}

/// Point-in-time view of one breaker, for monitoring surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    /// Service the breaker protects.
    pub service_name: String,
    /// Current state.
    pub state: CircuitState,
    /// Wall-clock time of the most recent state change.
    pub state_changed_at: DateTime<Utc>,
    /// Calls admitted for execution.
    pub total_calls: u64,
    /// Calls that completed successfully.
    pub total_successes: u64,
    /// Recorded failures.
    pub total_failures: u64,
    /// Calls that exceeded the deadline.
    pub total_timeouts: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Cumulative failure rate.
    pub failure_rate: f64,
    /// Mean of the retained response-time samples, in seconds.
    pub avg_response_time: f64,
    /// Calls currently in flight.
    pub active_calls: u32,
    /// Most recent recorded failure time.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Most recent recorded success time.
    pub last_success_time: Option<DateTime<Utc>>,
    /// Description of the most recent recorded failure.
    pub last_error: Option<String>,
    /// The configuration the breaker is running with.
    pub config: ConfigSnapshot,
    /// The most recent state transitions, oldest first.
    pub recent_state_changes: Vec<StateChange>,
}

/// The tunable values a breaker is running with, for monitoring surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Consecutive failures required to trip open.
    pub failure_threshold: u32,
    /// Open duration before a probe is allowed, in seconds.
    pub recovery_timeout_secs: u64,
    /// Half-open successes required to close.
    pub success_threshold: u32,
    /// Per-call deadline, in seconds.
    pub call_timeout_secs: u64,
    /// Concurrency admission cap.
    pub max_concurrent_calls: u32,
    /// Failure rate above which alerts fire.
    pub alert_threshold: f64,
    /// Reserved windowing knob, in seconds. Not consulted by the rate
    /// calculation.
    pub monitor_window_secs: u64,
}
