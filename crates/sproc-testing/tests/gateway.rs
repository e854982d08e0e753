//! Configuration-driven wiring.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::json;
use sproc_client::{Config, Gateway, OptionOverrides};
use sproc_testing::ScriptedManager;
use sproc_testing::fixtures::named;

const CONFIG: &str = r#"{
    "default_connection": "main",
    "defaults": { "timeout_ms": 2000, "retry_attempts": 1, "retry_delay_ms": 10 },
    "connections": {
        "main": { "connection_string": "Server=primary;", "max_connections": 2, "min_connections": 1 },
        "reporting": { "connection_string": "Server=replica;", "max_connections": 1, "min_connections": 0 }
    },
    "procedures": {
        "charge_customer": {
            "procedure": "billing.usp_charge",
            "params": { "customerId": "p_cust", "amount": "p_amt" }
        },
        "monthly_report": {
            "procedure": "reports.usp_monthly",
            "connection": "reporting",
            "params": { "year": 1, "month": 2 }
        }
    },
    "redact_keys": ["iban"]
}"#;

fn gateway() -> (Gateway<ScriptedManager>, HashMap<String, ScriptedManager>) {
    let config = Config::from_json_str(CONFIG).unwrap();
    let managers = Mutex::new(HashMap::new());
    let gateway = Gateway::from_config(&config, |name, settings| {
        assert!(settings.connection_string.starts_with("Server="));
        let manager = ScriptedManager::new();
        managers.lock().insert(name.to_string(), manager.clone());
        manager
    })
    .unwrap();
    (gateway, managers.into_inner())
}

#[tokio::test(start_paused = true)]
async fn warm_up_opens_minimum_connections() {
    let (gateway, managers) = gateway();
    gateway.warm_up().await.unwrap();

    assert_eq!(managers["main"].connects(), 1);
    assert_eq!(managers["reporting"].connects(), 0);

    let stats = gateway.data_access().connection_pool_stats();
    assert_eq!(stats["main"].idle, 1);
    assert_eq!(stats["reporting"].max, 1);
}

#[tokio::test(start_paused = true)]
async fn calls_route_to_pinned_default_and_overridden_pools() {
    let (gateway, managers) = gateway();
    let data = gateway.data_access();

    let charge = named(json!({"customerId": "C1", "amount": 10}));
    assert!(data.execute("charge_customer", &charge, &OptionOverrides::new()).await.is_success());
    assert_eq!(managers["main"].calls(), 1);

    let report = named(json!({"month": 6, "year": 2026}));
    let response = data.execute("monthly_report", &report, &OptionOverrides::new()).await;
    assert_eq!(response.request, vec![json!(2026), json!(6)]);
    assert_eq!(managers["reporting"].calls(), 1);

    let rerouted = OptionOverrides::new().connection_name("reporting");
    data.execute("charge_customer", &charge, &rerouted).await;
    assert_eq!(managers["reporting"].calls(), 2);
    assert_eq!(managers["main"].calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_connection_is_reported_without_retry() {
    let (gateway, _) = gateway();
    let data = gateway.data_access_with(OptionOverrides::new().connection_name("archive"));

    let response = data
        .execute(
            "charge_customer",
            &named(json!({"customerId": "C1", "amount": 1})),
            &OptionOverrides::new(),
        )
        .await;

    assert_eq!(response.error, 1);
    assert!(response.errmsg.contains("archive"));
    assert_eq!(data.performance_metrics().total_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn facades_share_one_invoker() {
    let (gateway, _) = gateway();
    let first = gateway.data_access();
    let second = gateway.data_access_with(OptionOverrides::new().retry_attempts(0));

    let params = named(json!({"customerId": "C1", "amount": 1}));
    first.execute("charge_customer", &params, &OptionOverrides::new()).await;
    second.execute("charge_customer", &params, &OptionOverrides::new()).await;

    assert_eq!(first.performance_metrics().total_calls, 2);
    second.clear_performance_metrics();
    assert_eq!(first.performance_metrics().total_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn calls_fail_fast_after_shutdown() {
    let (gateway, managers) = gateway();
    let data = gateway.data_access();
    gateway.shutdown();

    let response = data
        .execute(
            "charge_customer",
            &named(json!({"customerId": "C1", "amount": 1})),
            &OptionOverrides::new(),
        )
        .await;

    assert_eq!(response.error, 1);
    assert_eq!(managers["main"].calls(), 0);
    assert_eq!(data.performance_metrics().total_calls, 1);
}

#[test]
fn invalid_config_is_rejected_before_any_pool_is_built() {
    let config: Config = serde_json::from_str(
        r#"{"default_connection": "missing", "connections": {"main": {}}}"#,
    )
    .unwrap();

    let mut built = 0;
    let result = Gateway::from_config(&config, |_, _| {
        built += 1;
        ScriptedManager::new()
    });

    assert!(result.is_err());
    assert_eq!(built, 0);
}
