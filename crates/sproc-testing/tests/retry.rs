//! Retry and backoff behavior of the procedure invoker.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use sproc_client::{ErrorKind, InvocationOptions, InvocationRequest};
use sproc_testing::fixtures::{self, POOL_NAME};
use sproc_testing::{ScriptedManager, Step};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn request(retries: u32, delay_ms: u64) -> InvocationRequest {
    InvocationRequest::new(
        "billing.usp_charge",
        vec![json!("C1"), json!("100")],
        InvocationOptions::new()
            .retry_attempts(retries)
            .retry_delay(Duration::from_millis(delay_ms)),
    )
}

/// Paused-clock timers fire on millisecond ticks.
fn assert_close(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(3),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_wait_linearly_growing_delays() {
    let manager = ScriptedManager::new();
    manager.push_repeated(Step::Transport("connection reset".into()), 4);
    let invoker = fixtures::invoker(manager.clone(), 2).unwrap();

    let started = Instant::now();
    let err = assert_err!(invoker.call(&request(3, 100)).await);

    assert_eq!(err.kind(), ErrorKind::Driver);
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(manager.calls(), 4);

    let log = manager.call_log();
    let gaps: Vec<_> = log
        .windows(2)
        .map(|pair| pair[1].started_at - pair[0].started_at)
        .collect();
    assert_eq!(gaps.len(), 3);
    for (gap, expected_ms) in gaps.iter().zip([100, 200, 300]) {
        assert_close(*gap, expected_ms);
    }
    assert_close(started.elapsed(), 600);

    let snap = invoker.metrics_snapshot();
    assert_eq!(snap.total_calls, 4);
    assert_eq!(snap.failure_count, 4);
}

#[tokio::test(start_paused = true)]
async fn business_error_makes_exactly_one_attempt() {
    let manager = ScriptedManager::new();
    manager.push(Step::Business("insufficient funds".into(), Some(50001)));
    let invoker = fixtures::invoker(manager.clone(), 2).unwrap();

    let err = assert_err!(invoker.call(&request(5, 100)).await);

    assert_eq!(err.kind(), ErrorKind::ProcedureBusiness);
    assert_eq!(err.to_string(), "insufficient funds");
    assert_eq!(manager.calls(), 1);
    assert_eq!(invoker.metrics_snapshot().total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_attempt_times_out_and_is_retried() {
    let manager = ScriptedManager::new();
    manager.push(Step::Hang);
    let invoker = fixtures::invoker(manager.clone(), 1).unwrap();

    let req = InvocationRequest::new(
        "dbo.usp_slow",
        vec![],
        InvocationOptions::new()
            .timeout(Duration::from_millis(50))
            .retry_attempts(1)
            .retry_delay(Duration::from_millis(10)),
    );

    assert_ok!(invoker.call(&req).await);
    assert_eq!(manager.calls(), 2);
    // The hung session is discarded, the retry runs on a fresh one.
    assert_eq!(manager.closed(), 1);
    let log = manager.call_log();
    assert_ne!(log[0].connection_id, log[1].connection_id);

    let snap = invoker.metrics_snapshot();
    assert_eq!((snap.success_count, snap.failure_count), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_reported_after_retries() {
    let manager = ScriptedManager::new();
    manager.push_repeated(Step::Hang, 2);
    let invoker = fixtures::invoker(manager.clone(), 1).unwrap();

    let req = InvocationRequest::new(
        "dbo.usp_slow",
        vec![],
        InvocationOptions::new()
            .timeout(Duration::from_millis(50))
            .retry_attempts(1)
            .retry_delay(Duration::from_millis(10)),
    );

    let err = assert_err!(invoker.call(&req).await);
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_is_transient() {
    let manager = ScriptedManager::new();
    let invoker = fixtures::invoker(manager.clone(), 1).unwrap();
    let pool = invoker.pool(POOL_NAME).unwrap();

    let held = pool.get().await.unwrap();
    let err = assert_err!(invoker.call(&request(0, 10)).await);
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(err.is_transient());
    assert_eq!(manager.calls(), 0);
    drop(held);

    assert_ok!(invoker.call(&request(0, 10)).await);
    assert_eq!(manager.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn refused_connect_is_retried() {
    let manager = ScriptedManager::new();
    manager.refuse_connects(1);
    let invoker = fixtures::invoker(manager.clone(), 1).unwrap();

    assert_ok!(invoker.call(&request(1, 10)).await);
    assert_eq!(manager.connects(), 1);
    assert_eq!(invoker.metrics_snapshot().total_calls, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn k_transient_failures_then_success_yield_k_plus_one_samples(
        retries in 0u32..6,
        k_seed in 0u32..6,
    ) {
        let k = k_seed.min(retries);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let manager = ScriptedManager::new();
            manager.push_repeated(Step::Transport("flap".into()), k as usize);
            let invoker = fixtures::invoker(manager.clone(), 1).unwrap();

            let result = invoker.call(&request(retries, 5)).await;
            prop_assert!(result.is_ok());

            let snap = invoker.metrics_snapshot();
            prop_assert_eq!(snap.total_calls, u64::from(k) + 1);
            prop_assert_eq!(snap.failure_count, u64::from(k));
            prop_assert_eq!(snap.success_count, 1);
            Ok(())
        })?;
    }
}
