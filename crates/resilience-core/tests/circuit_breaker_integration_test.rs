//! Integration tests for the circuit breaker lifecycle.
//!
//! These drive the breaker through full trip/recover cycles on virtual
//! time and verify the accounting a monitoring surface would read.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use resilience_core::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UpstreamError(&'static str);

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn fail(breaker: &CircuitBreaker) {
    let result = breaker
        .call(|| async { Err::<(), _>(UpstreamError("connection reset")) })
        .await;
    assert!(result.is_err());
}

async fn succeed(breaker: &CircuitBreaker) {
    breaker
        .call(|| async { Ok::<_, UpstreamError>(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn five_failures_trip_open_and_the_sixth_call_is_rejected() {
    init_tracing();
    let breaker = CircuitBreaker::new("model-provider", CircuitBreakerConfig::default());

    for _ in 0..5 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invocations = AtomicU32::new(0);
    let err = breaker
        .call(|| async {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok::<_, UpstreamError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CircuitBreakerError::CircuitOpen { .. }));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn full_trip_probe_and_recovery_cycle() {
    init_tracing();
    let breaker = CircuitBreaker::new("model-provider", CircuitBreakerConfig::default());

    // Trip open.
    for _ in 0..5 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Too early for a probe.
    let err = breaker
        .call(|| async { Ok::<_, UpstreamError>(()) })
        .await
        .unwrap_err();
    assert!(err.is_rejection());

    // After the recovery timeout the next call probes.
    tokio::time::advance(Duration::from_secs(61)).await;
    succeed(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // Two more consecutive successes (three total) close the circuit.
    succeed(&breaker).await;
    succeed(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn probe_failure_reopens_and_restarts_the_recovery_window() {
    init_tracing();
    let breaker = CircuitBreaker::new("model-provider", CircuitBreakerConfig::default());

    for _ in 0..5 {
        fail(&breaker).await;
    }
    tokio::time::advance(Duration::from_secs(61)).await;
    succeed(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    let half_open_at = breaker.stats().state_changed_at;

    fail(&breaker).await;
    let snapshot = breaker.stats();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert!(snapshot.state_changed_at >= half_open_at);

    // The freshly restarted window still rejects.
    tokio::time::advance(Duration::from_secs(59)).await;
    let err = breaker
        .call(|| async { Ok::<_, UpstreamError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, CircuitBreakerError::CircuitOpen { .. }));
}

#[tokio::test(start_paused = true)]
async fn slow_call_times_out_and_is_counted_twice() {
    init_tracing();
    let breaker = CircuitBreaker::new("model-provider", CircuitBreakerConfig::default());

    let err = breaker
        .call(|| async {
            tokio::time::sleep(Duration::from_secs(31)).await;
            Ok::<_, UpstreamError>(())
        })
        .await
        .unwrap_err();

    match err {
        CircuitBreakerError::CallTimeout { service, timeout } => {
            assert_eq!(service, "model-provider");
            assert_eq!(timeout, Duration::from_secs(30));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let snapshot = breaker.stats();
    assert_eq!(snapshot.total_timeouts, 1);
    assert_eq!(snapshot.total_failures, 1);
    assert_eq!(snapshot.total_calls, 1);
    assert_eq!(snapshot.active_calls, 0);
}

#[tokio::test]
async fn failure_rate_reflects_interleaved_outcomes() {
    init_tracing();
    let breaker = CircuitBreaker::new("model-provider", CircuitBreakerConfig::default());

    // Ten calls, six failures, never five in a row: the circuit stays
    // closed while the cumulative rate crosses the alert threshold.
    let outcomes = [
        false, false, false, false, true, false, false, true, true, true,
    ];
    for ok in outcomes {
        if ok {
            succeed(&breaker).await;
        } else {
            fail(&breaker).await;
        }
    }

    let snapshot = breaker.stats();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.total_calls, 10);
    assert_eq!(snapshot.total_failures, 6);
    assert!((snapshot.failure_rate - 0.6).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn active_calls_return_to_zero_under_mixed_outcomes() {
    init_tracing();
    let breaker = Arc::new(CircuitBreaker::new(
        "model-provider",
        CircuitBreakerConfig {
            failure_threshold: 1000,
            max_concurrent_calls: 100,
            ..Default::default()
        },
    ));

    let mut handles = Vec::new();
    for i in 0..30_u32 {
        let breaker = Arc::clone(&breaker);
        handles.push(tokio::spawn(async move {
            let _ = breaker
                .call(|| async move {
                    match i % 3 {
                        0 => Ok(()),
                        1 => Err(UpstreamError("connection reset")),
                        _ => {
                            tokio::time::sleep(Duration::from_secs(31)).await;
                            Ok(())
                        }
                    }
                })
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = breaker.stats();
    assert_eq!(snapshot.active_calls, 0);
    assert_eq!(snapshot.total_calls, 30);
    assert_eq!(snapshot.total_successes, 10);
    assert_eq!(snapshot.total_timeouts, 10);
    assert_eq!(snapshot.total_failures, 20);
}
