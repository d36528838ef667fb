//! Per-breaker call statistics.
//!
//! One [`CircuitBreakerStats`] instance is owned exclusively by its breaker
//! and is only ever mutated while the breaker's lock is held. The breaker
//! decides state transitions; this module just keeps the books.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitState;

/// Number of response-time samples kept for the rolling average.
const RESPONSE_TIME_SAMPLES: usize = 100;

/// Number of state transitions kept in the transition log.
const STATE_CHANGE_CAPACITY: usize = 50;

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    /// When the transition happened.
    pub at: DateTime<Utc>,
    /// State before the transition.
    pub from: CircuitState,
    /// State after the transition.
    pub to: CircuitState,
    /// Consecutive failures at the moment of transition.
    pub consecutive_failures: u32,
    /// Total failures at the moment of transition.
    pub total_failures: u64,
    /// Total admitted calls at the moment of transition.
    pub total_calls: u64,
}

/// Mutable call counters and rolling samples for one circuit breaker.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    /// Calls admitted for execution.
    pub total_calls: u64,
    /// Calls that completed successfully.
    pub total_successes: u64,
    /// Recorded failures (including timeouts and open-circuit rejections).
    pub total_failures: u64,
    /// Calls that exceeded the per-call deadline.
    pub total_timeouts: u64,
    /// Failures since the last success. Reset to 0 on success.
    pub consecutive_failures: u32,
    /// Successes since the last failure. Reset to 0 on failure.
    pub consecutive_successes: u32,
    /// Wall-clock time of the most recent recorded failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent recorded success.
    pub last_success_time: Option<DateTime<Utc>>,
    /// Description of the most recent recorded failure.
    pub last_error: Option<String>,
    response_times: VecDeque<f64>,
    state_changes: VecDeque<StateChange>,
}

impl CircuitBreakerStats {
    /// Create empty stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call admitted for execution.
    pub fn record_call(&mut self) {
        self.total_calls += 1;
    }

    /// Record a successful call with its measured duration.
    pub fn record_success(&mut self, elapsed: std::time::Duration) {
        self.total_successes += 1;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.last_success_time = Some(Utc::now());
        self.push_response_time(elapsed.as_secs_f64());
    }

    /// Record a failed call with a human-readable reason.
    pub fn record_failure(&mut self, reason: &str) {
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.last_failure_time = Some(Utc::now());
        self.last_error = Some(reason.to_string());
    }

    /// Record a call that exceeded its deadline. The caller records the
    /// accompanying failure separately.
    pub fn record_timeout(&mut self) {
        self.total_timeouts += 1;
    }

    /// Cumulative failure rate: `total_failures / total_calls`.
    ///
    /// Returns 0.0 before any call has been admitted. Open-circuit rejections
    /// count as failures but not as calls, so the rate can exceed 1.0 for a
    /// breaker that has been rejecting traffic.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_failures as f64 / self.total_calls as f64
    }

    /// Mean of the retained response-time samples, in seconds.
    #[must_use]
    pub fn avg_response_time(&self) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        self.response_times.iter().sum::<f64>() / self.response_times.len() as f64
    }

    /// Append a transition record, discarding the oldest past capacity.
    pub fn push_state_change(&mut self, change: StateChange) {
        self.state_changes.push_back(change);
        while self.state_changes.len() > STATE_CHANGE_CAPACITY {
            self.state_changes.pop_front();
        }
    }

    /// The `n` most recent transition records, oldest first.
    #[must_use]
    pub fn recent_state_changes(&self, n: usize) -> Vec<StateChange> {
        let skip = self.state_changes.len().saturating_sub(n);
        self.state_changes.iter().skip(skip).cloned().collect()
    }

    /// Number of retained response-time samples.
    #[must_use]
    pub fn response_time_samples(&self) -> usize {
        self.response_times.len()
    }

    fn push_response_time(&mut self, seconds: f64) {
        self.response_times.push_back(seconds);
        while self.response_times.len() > RESPONSE_TIME_SAMPLES {
            self.response_times.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn fresh_stats_are_zeroed() {
        let stats = CircuitBreakerStats::new();
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.failure_rate(), 0.0);
        assert_eq!(stats.avg_response_time(), 0.0);
        assert!(stats.last_failure_time.is_none());
        assert!(stats.last_success_time.is_none());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut stats = CircuitBreakerStats::new();
        stats.record_failure("boom");
        stats.record_failure("boom");
        assert_eq!(stats.consecutive_failures, 2);

        stats.record_success(Duration::from_millis(10));
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 1);
    }

    #[test]
    fn failure_resets_consecutive_successes_and_keeps_reason() {
        let mut stats = CircuitBreakerStats::new();
        stats.record_success(Duration::from_millis(10));
        stats.record_failure("connection refused");
        assert_eq!(stats.consecutive_successes, 0);
        assert_eq!(stats.consecutive_failures, 1);
        assert_eq!(stats.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn failure_rate_tracks_counters() {
        let mut stats = CircuitBreakerStats::new();
        for _ in 0..10 {
            stats.record_call();
        }
        for _ in 0..6 {
            stats.record_failure("boom");
        }
        assert!((stats.failure_rate() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn response_times_are_bounded_to_last_100() {
        let mut stats = CircuitBreakerStats::new();
        for _ in 0..50 {
            stats.record_success(Duration::from_secs(9));
        }
        for _ in 0..100 {
            stats.record_success(Duration::from_secs(1));
        }
        // The 9s samples have rotated out entirely.
        assert_eq!(stats.response_time_samples(), 100);
        assert!((stats.avg_response_time() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn state_changes_are_bounded_to_last_50() {
        let mut stats = CircuitBreakerStats::new();
        for i in 0..60 {
            stats.push_state_change(StateChange {
                at: Utc::now(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
                consecutive_failures: i,
                total_failures: u64::from(i),
                total_calls: u64::from(i),
            });
        }
        let recent = stats.recent_state_changes(usize::MAX);
        assert_eq!(recent.len(), 50);
        // Oldest retained entry is the 11th pushed.
        assert_eq!(recent[0].consecutive_failures, 10);
    }

    #[test]
    fn recent_state_changes_returns_newest_slice_in_order() {
        let mut stats = CircuitBreakerStats::new();
        for i in 0..20 {
            stats.push_state_change(StateChange {
                at: Utc::now(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
                consecutive_failures: i,
                total_failures: 0,
                total_calls: 0,
            });
        }
        let recent = stats.recent_state_changes(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.first().map(|c| c.consecutive_failures), Some(10));
        assert_eq!(recent.last().map(|c| c.consecutive_failures), Some(19));
    }

    proptest! {
        /// One of the run-length counters is always zero, and the failure
        /// rate always matches the raw counters, for any outcome sequence.
        #[test]
        fn counter_invariants_hold(outcomes in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut stats = CircuitBreakerStats::new();
            for ok in outcomes {
                stats.record_call();
                if ok {
                    stats.record_success(Duration::from_millis(5));
                } else {
                    stats.record_failure("boom");
                }
                prop_assert!(
                    stats.consecutive_failures == 0 || stats.consecutive_successes == 0
                );
                let expected = stats.total_failures as f64 / stats.total_calls as f64;
                prop_assert!((stats.failure_rate() - expected).abs() < f64::EPSILON);
            }
        }
    }
}
