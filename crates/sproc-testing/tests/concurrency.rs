//! Many callers sharing one invoker.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sproc_client::{InvocationOptions, InvocationRequest, OptionOverrides};
use sproc_testing::fixtures::{self, POOL_NAME, charge_manifest, named};
use sproc_testing::{ScriptedManager, Step};

const CALLERS: u64 = 64;
const MAX_CONNECTIONS: u32 = 4;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_successes_are_all_counted() {
    let manager = ScriptedManager::new();
    let invoker = fixtures::invoker(manager.clone(), MAX_CONNECTIONS).unwrap();

    let tasks: Vec<_> = (0..CALLERS)
        .map(|i| {
            let invoker = Arc::clone(&invoker);
            tokio::spawn(async move {
                let req = InvocationRequest::new(
                    "dbo.usp_touch",
                    vec![json!(i)],
                    InvocationOptions::new(),
                );
                invoker.call(&req).await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let snap = invoker.metrics_snapshot();
    assert_eq!(snap.total_calls, CALLERS);
    assert_eq!(snap.success_count, CALLERS);
    assert_eq!(snap.failure_count, 0);

    let stats = &invoker.pool_stats()[POOL_NAME];
    assert_eq!(stats.checkouts, CALLERS);
    assert_eq!(stats.checkins, CALLERS);
    assert!(manager.connects() <= u64::from(MAX_CONNECTIONS));
    assert!(manager.peak_in_flight() <= MAX_CONNECTIONS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_slow_calls_never_exceed_pool_size() {
    let manager = ScriptedManager::new();
    manager.push_repeated(Step::Delay(Duration::from_millis(5)), 32);
    let data = fixtures::data_access(
        manager.clone(),
        MAX_CONNECTIONS,
        [charge_manifest()],
        InvocationOptions::new(),
    )
    .unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let data = data.clone();
            tokio::spawn(async move {
                let params = named(json!({"customerId": format!("C{i}"), "amount": i}));
                data.execute("charge_customer", &params, &OptionOverrides::new())
                    .await
            })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap();
        assert!(response.is_success(), "{response:?}");
    }

    assert!(manager.peak_in_flight() <= MAX_CONNECTIONS);
    assert_eq!(data.performance_metrics().success_count, 32);

    // Each caller's arguments reached the driver in manifest order.
    for record in manager.call_log() {
        let customer = record.args[0].as_str().unwrap();
        let amount = record.args[1].as_u64().unwrap();
        assert_eq!(customer, format!("C{amount}"));
    }
}
