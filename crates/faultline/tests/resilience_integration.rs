//! Integration tests for the resilience primitives
//!
//! Exercises the circuit breaker and retry executor together under realistic
//! failure scenarios, including the documented preset behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use faultline::{
    CircuitBreaker, CircuitState, Fault, MockClock, RetryExecutor, RetryPolicy,
};

/// Validates retry recovery from transient failures with exponential
/// backoff.
///
/// # Test Steps
/// 1. Configure 5 attempts with millisecond backoff
/// 2. Fail the first 3 attempts, succeed on the 4th
/// 3. Verify the success result and exactly 4 invocations
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_recovers_from_transient_failures() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let policy = RetryPolicy::new(4, Duration::from_millis(2), Duration::from_millis(20), 2.0)
        .expect("valid policy")
        .with_jitter(false);
    let executor = RetryExecutor::new();

    let result = executor
        .with_retry(&policy, || {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 3 {
                    Err(Fault::network("transient failure"))
                } else {
                    Ok("success")
                }
            }
        })
        .await;

    assert_eq!(result.expect("should recover"), "success");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
}

/// Validates retries stop at the attempt limit and surface the final fault
/// unchanged.
///
/// # Test Steps
/// 1. Configure 3 retries (4 invocations total)
/// 2. Fail every attempt with a numbered fault
/// 3. Verify exactly 4 invocations and the 4th fault returned
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_exhaustion_preserves_last_fault() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4), 2.0)
        .expect("valid policy")
        .with_jitter(false);
    let executor = RetryExecutor::new();

    let result: Result<(), Fault> = executor
        .with_retry(&policy, || {
            let n = attempt_count_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(Fault::system(format!("persistent failure {}", n))) }
        })
        .await;

    assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
    match result {
        Err(Fault::System { message, .. }) => assert_eq!(message, "persistent failure 4"),
        other => panic!("Expected the last system fault, got {:?}", other),
    }
}

/// Validates the documented `fast` preset behavior: an operation failing
/// twice then succeeding returns the success after exactly two jittered
/// waits, whose recorded sum stays within the 50-400ms per-wait envelope.
#[tokio::test(flavor = "multi_thread")]
async fn test_fast_preset_two_failures_then_success() {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let attempt_count_clone = Arc::clone(&attempt_count);

    let executor = RetryExecutor::new();
    let outcome = executor
        .with_retry_outcome("fast-preset", &RetryPolicy::fast(), || {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(Fault::network("flaky"))
                } else {
                    Ok(99)
                }
            }
        })
        .await;

    assert_eq!(outcome.result.expect("third attempt succeeds"), 99);
    assert_eq!(outcome.attempts, 3);
    // Two waits: jittered 100ms then jittered 200ms, each scaled into
    // [0.5, 1.0] of the exact backoff.
    assert!(outcome.total_delay >= Duration::from_millis(150));
    assert!(outcome.total_delay <= Duration::from_millis(300));
}

/// Validates fail-fast protection: a breaker tripped by 5 failures rejects
/// the 6th call without invoking the operation.
///
/// # Test Steps
/// 1. Build a breaker with threshold 5 and a 60s cooldown on a mock clock
/// 2. Drive 5 failing calls through it
/// 3. Issue a 6th call before the cooldown elapses
/// 4. Verify the rejection and that the invocation count stayed at 5
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_fail_fast_after_threshold() {
    let clock = MockClock::new();
    let breaker = CircuitBreaker::builder("payments")
        .failure_threshold(5)
        .reset_timeout(Duration::from_secs(60))
        .clock(clock.clone())
        .build()
        .expect("valid breaker config");

    let invocations = Arc::new(AtomicU32::new(0));
    for _ in 0..5 {
        let invocations = Arc::clone(&invocations);
        let result: Result<(), Fault> = breaker
            .execute(|| async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Err(Fault::network("gateway unreachable"))
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invocations_clone = Arc::clone(&invocations);
    let result: Result<(), Fault> = breaker
        .execute(|| async move {
            invocations_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(Fault::CircuitOpen { .. })));
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
}

/// Validates the full recovery cycle: open circuit, cooldown, half-open
/// probe, closed again with counters reset.
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_recovery_cycle() {
    let clock = MockClock::new();
    let breaker = CircuitBreaker::builder("search")
        .failure_threshold(2)
        .reset_timeout(Duration::from_secs(30))
        .clock(clock.clone())
        .build()
        .expect("valid breaker config");

    for _ in 0..2 {
        let result: Result<(), Fault> =
            breaker.execute(|| async { Err(Fault::network("down")) }).await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(31));

    let result = breaker.execute(|| async { Ok::<_, Fault>("recovered") }).await;
    assert_eq!(result.expect("probe succeeds"), "recovered");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failures, 0);
}

/// Validates retry and breaker composition: once the breaker opens,
/// remaining attempts are rejected without reaching the dependency.
///
/// # Test Steps
/// 1. Wrap a breaker (threshold 2) inside a 5-retry policy
/// 2. Fail every real invocation
/// 3. Verify the dependency saw only 2 calls and the final fault is the
///    breaker rejection
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_through_open_breaker() {
    let breaker = Arc::new(
        CircuitBreaker::builder("inventory")
            .failure_threshold(2)
            .reset_timeout(Duration::from_secs(60))
            .build()
            .expect("valid breaker config"),
    );
    let executor = RetryExecutor::new();
    let policy = RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(1), 2.0)
        .expect("valid policy")
        .with_jitter(false);

    let dependency_calls = Arc::new(AtomicU32::new(0));
    let result: Result<(), Fault> = executor
        .with_retry(&policy, || {
            let breaker = Arc::clone(&breaker);
            let dependency_calls = Arc::clone(&dependency_calls);
            async move {
                breaker
                    .execute(|| async move {
                        dependency_calls.fetch_add(1, Ordering::SeqCst);
                        Err(Fault::network("unreachable"))
                    })
                    .await
            }
        })
        .await;

    assert!(matches!(result, Err(Fault::CircuitOpen { .. })));
    assert_eq!(dependency_calls.load(Ordering::SeqCst), 2);
    assert_eq!(breaker.state(), CircuitState::Open);
}

/// Validates exempt faults pass through an otherwise healthy breaker
/// without tripping it, while counted faults still do.
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_exemptions_and_counted_failures() {
    let breaker = CircuitBreaker::builder("orders")
        .failure_threshold(2)
        .exempt_when(|fault| matches!(fault, Fault::Validation { .. }))
        .build()
        .expect("valid breaker config");

    for _ in 0..10 {
        let result: Result<(), Fault> = breaker
            .execute(|| async { Err(Fault::validation("sku", "unknown format")) })
            .await;
        assert!(matches!(result, Err(Fault::Validation { .. })));
    }
    assert_eq!(breaker.state(), CircuitState::Closed);

    for _ in 0..2 {
        let result: Result<(), Fault> =
            breaker.execute(|| async { Err(Fault::network("down")) }).await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);
}
