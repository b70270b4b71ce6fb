//! End-to-end circuit breaker scenarios.

mod common;

use common::ManualClock;
use std::time::Duration;
use switchyard::{CircuitBreaker, CircuitState, PolicyError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct UpstreamDown;

impl std::fmt::Display for UpstreamDown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("upstream down")
    }
}

impl std::error::Error for UpstreamDown {}

async fn ok(breaker: &CircuitBreaker) -> Result<&'static str, PolicyError<UpstreamDown>> {
    breaker.run(|| async { Ok("served") }).await
}

async fn fail(breaker: &CircuitBreaker) -> Result<&'static str, PolicyError<UpstreamDown>> {
    breaker.run(|| async { Err(PolicyError::Inner(UpstreamDown)) }).await
}

/// Threshold 0.5, cooldown 3 s, probe budget 2: trip after the rate reaches
/// one half, probe twice after the cooldown, then close and serve.
#[tokio::test]
async fn trip_cooldown_probe_recover() {
    let clock = ManualClock::new(0);
    let breaker = CircuitBreaker::new("upstream", 0.5, Duration::from_secs(3), 2)
        .unwrap()
        .with_clock(clock.clone());

    // One success, one failure: observed rate 0.5.
    assert_eq!(ok(&breaker).await.unwrap(), "served");
    assert!(fail(&breaker).await.unwrap_err().is_inner());

    // Rate ≥ threshold: the next call trips and is rejected.
    let err = ok(&breaker).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.time_until_half_open(), Duration::from_secs(3));

    // Cooldown elapses: the next two calls probe in half-open.
    clock.advance(4_000);
    assert_eq!(ok(&breaker).await.unwrap(), "served");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(breaker.metrics().half_open_success, 1);

    assert_eq!(ok(&breaker).await.unwrap(), "served");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_eq!(breaker.metrics().half_open_success, 2);

    // Probe rate 0 ≤ 0.5: close, run the call, count it in closed counters.
    assert_eq!(ok(&breaker).await.unwrap(), "served");
    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.success, 1);
    assert!(metrics.opened_at.is_none());
}

#[tokio::test]
async fn reset_restores_pristine_state_after_any_sequence() {
    let clock = ManualClock::new(0);
    let breaker = CircuitBreaker::new("upstream", 0.4, Duration::from_secs(2), 3)
        .unwrap()
        .with_clock(clock.clone());

    let _ = ok(&breaker).await;
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    let _ = ok(&breaker).await;
    clock.advance(2_500);
    let _ = ok(&breaker).await;

    breaker.reset();
    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.success, 0);
    assert_eq!(metrics.failure, 0);
    assert_eq!(metrics.half_open_success, 0);
    assert_eq!(metrics.half_open_failure, 0);
    assert_eq!(metrics.failure_rate, 0.0);
    assert!(metrics.opened_at.is_none());
}

#[tokio::test]
async fn open_rejections_do_not_invoke_the_operation() {
    let clock = ManualClock::new(0);
    let breaker = CircuitBreaker::new("upstream", 0.5, Duration::from_secs(3), 1)
        .unwrap()
        .with_clock(clock.clone());

    assert!(fail(&breaker).await.is_err());
    assert!(ok(&breaker).await.unwrap_err().is_circuit_open());

    let mut invoked = false;
    let result: Result<(), PolicyError<UpstreamDown>> = breaker
        .run(|| {
            invoked = true;
            async { Ok(()) }
        })
        .await;
    assert!(result.unwrap_err().is_circuit_open());
    assert!(!invoked, "operation must not run while the breaker is open");
}

#[tokio::test]
async fn failed_probes_reopen_with_fresh_cooldown() {
    let clock = ManualClock::new(0);
    let breaker = CircuitBreaker::new("upstream", 0.5, Duration::from_secs(3), 1)
        .unwrap()
        .with_clock(clock.clone());

    assert!(fail(&breaker).await.is_err());
    assert!(ok(&breaker).await.unwrap_err().is_circuit_open());

    clock.advance(3_000);
    assert!(fail(&breaker).await.is_err()); // the probe itself fails
    assert!(breaker.is_half_open());

    // Probe budget consumed at rate 1.0: rejected and open again.
    assert!(ok(&breaker).await.unwrap_err().is_circuit_open());
    assert!(breaker.is_open());
    assert_eq!(breaker.time_until_half_open(), Duration::from_secs(3));
}
