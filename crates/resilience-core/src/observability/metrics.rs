//! Prometheus-style metrics for circuit breakers.
//!
//! One gauge tracks each breaker's state; counters track call outcomes and
//! admission rejections. All series carry a `service` label.

use metrics::{counter, gauge};

use crate::circuit_breaker::CircuitState;

/// Update the state gauge for `service`.
///
/// Encoded as 0 = closed, 1 = open, 2 = half-open.
pub fn record_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(value);
}

/// Count a successful call through `service`'s breaker.
pub fn record_success(service: &str) {
    counter!(
        "circuit_breaker_success_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Count a recorded failure for `service`.
pub fn record_failure(service: &str) {
    counter!(
        "circuit_breaker_failures_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Count a call to `service` that exceeded its deadline.
pub fn record_timeout(service: &str) {
    counter!(
        "circuit_breaker_timeouts_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Count a call rejected at admission, labeled with the rejection reason
/// (`circuit_open` or `concurrency_limit`).
pub fn record_rejection(service: &str, reason: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}
