//! Contract tests against a real Metro dev server. Ignored by default
//! because they require a running React Native app on the host machine.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use conn_ledger::ConnectionLedger;
use event_tap::TapSet;
use inspector_adapter::{discovery, event_bus, fetch_build_status, BridgeConfig, InspectorAdapter};
use tokio::time::sleep;

fn contract_enabled() -> bool {
    env::var("SOULBRIDGE_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn contract_port() -> u16 {
    env::var("SOULBRIDGE_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8081)
}

#[tokio::test]
#[ignore = "requires a running Metro dev server; set SOULBRIDGE_CONTRACT=1"]
async fn contract_discovers_connects_and_evaluates() {
    if !contract_enabled() {
        eprintln!("skipping Metro contract test (SOULBRIDGE_CONTRACT not enabled)");
        return;
    }

    let port = contract_port();
    let targets = discovery::fetch_targets(port).await;
    assert!(!targets.is_empty(), "expected at least one runtime target");

    let taps = Arc::new(TapSet::default());
    let ledger = Arc::new(ConnectionLedger::new());
    let (bus, _rx) = event_bus(64);
    let adapter = Arc::new(InspectorAdapter::new(
        BridgeConfig::default(),
        Arc::clone(&taps),
        ledger,
        bus,
    ));

    adapter.connect(port).await.expect("connect");
    let value = adapter.evaluate("1 + 1", false).await.expect("evaluate");
    assert_eq!(value, "2");

    // Give the app a moment to emit console traffic.
    sleep(Duration::from_secs(2)).await;
    println!("captured {} log records", taps.logs.len());

    adapter.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a running Metro dev server; set SOULBRIDGE_CONTRACT=1"]
async fn contract_reads_build_status() {
    if !contract_enabled() {
        eprintln!("skipping Metro contract test (SOULBRIDGE_CONTRACT not enabled)");
        return;
    }

    let idle = fetch_build_status(contract_port())
        .await
        .expect("status endpoint");
    println!("bundler idle: {}", idle);
}
