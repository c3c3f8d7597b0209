//! End-to-end adapter tests against a fake inspector WebSocket server.
//!
//! The server speaks just enough of the protocol to answer the capability
//! enables and `Runtime.evaluate`, push console notifications, and drop the
//! connection on demand.

use std::sync::Arc;
use std::time::Duration;

use conn_ledger::{ConnectionLedger, ConnectionStatus};
use event_tap::TapSet;
use futures::{SinkExt, StreamExt};
use inspector_adapter::{event_bus, BridgeConfig, InspectorAdapter, OpenMode, ReconnectPolicy};
use serde_json::{json, Value};
use soulbridge_core_types::{BridgeErrorKind, RuntimeTarget};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_fake_inspector() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let frame: Value = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    let id = frame["id"].as_u64();
                    match frame["method"].as_str().unwrap_or("") {
                        "Runtime.enable" | "Log.enable" | "Network.enable" => {
                            if let Some(id) = id {
                                let reply = json!({ "id": id, "result": {} });
                                let _ = ws.send(Message::Text(reply.to_string())).await;
                            }
                        }
                        "Runtime.evaluate" => {
                            let expression =
                                frame["params"]["expression"].as_str().unwrap_or("");
                            if expression == "close()" {
                                // Simulate the runtime dropping the socket
                                // without answering.
                                return;
                            }
                            let reply = if expression.contains("throw") {
                                json!({
                                    "id": id,
                                    "result": {
                                        "result": { "type": "object", "subtype": "error" },
                                        "exceptionDetails": {
                                            "text": "Uncaught",
                                            "exception": { "description": "Error: boom" }
                                        }
                                    }
                                })
                            } else {
                                json!({
                                    "id": id,
                                    "result": {
                                        "result": {
                                            "type": "number",
                                            "value": 42,
                                            "description": "42"
                                        }
                                    }
                                })
                            };
                            let _ = ws.send(Message::Text(reply.to_string())).await;

                            let note = json!({
                                "method": "Runtime.consoleAPICalled",
                                "params": {
                                    "type": "log",
                                    "args": [{ "type": "string", "value": "evaluated" }]
                                }
                            });
                            let _ = ws.send(Message::Text(note.to_string())).await;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    (port, task)
}

fn test_target(port: u16) -> RuntimeTarget {
    RuntimeTarget {
        id: "page-1".to_string(),
        title: "Hermes React Native".to_string(),
        description: "".to_string(),
        app_id: Some("com.example.app".to_string()),
        port,
        device_name: None,
        ws_url: format!("ws://127.0.0.1:{}", port),
    }
}

fn test_adapter() -> (Arc<InspectorAdapter>, Arc<TapSet>, Arc<ConnectionLedger>) {
    let taps = Arc::new(TapSet::default());
    let ledger = Arc::new(ConnectionLedger::new());
    let cfg = BridgeConfig {
        reconnect: ReconnectPolicy {
            enabled: false,
            ..ReconnectPolicy::default()
        },
        ..BridgeConfig::default()
    };
    let (bus, _rx) = event_bus(64);
    let adapter = Arc::new(InspectorAdapter::new(
        cfg,
        Arc::clone(&taps),
        Arc::clone(&ledger),
        bus,
    ));
    (adapter, taps, ledger)
}

async fn wait_for(mut cond: impl FnMut() -> bool, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn evaluate_round_trip_formats_the_result() {
    let (port, server) = spawn_fake_inspector().await;
    let (adapter, taps, _ledger) = test_adapter();

    let info = adapter
        .open(test_target(port), port, OpenMode::Fresh)
        .await
        .expect("session opens");
    assert_eq!(info.key, format!("{}-page-1", port));

    let value = adapter.evaluate("6 * 7", false).await.expect("evaluate");
    assert_eq!(value, "42");

    // The notification pushed after the reply must land in the log buffer.
    assert!(
        wait_for(
            || taps
                .logs
                .recent(10)
                .iter()
                .any(|rec| rec.message == "evaluated"),
            Duration::from_secs(2)
        )
        .await,
        "console notification must be ingested"
    );

    adapter.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn throwing_expression_surfaces_the_exception_description() {
    let (port, server) = spawn_fake_inspector().await;
    let (adapter, _taps, _ledger) = test_adapter();

    adapter
        .open(test_target(port), port, OpenMode::Fresh)
        .await
        .expect("session opens");

    let err = adapter
        .evaluate("throw new Error('boom')", false)
        .await
        .expect_err("must fail");
    assert_eq!(err.kind, BridgeErrorKind::Evaluation);
    assert_eq!(err.hint.as_deref(), Some("Error: boom"));

    adapter.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn duplicate_open_is_a_no_op() {
    let (port, server) = spawn_fake_inspector().await;
    let (adapter, _taps, _ledger) = test_adapter();

    let first = adapter
        .open(test_target(port), port, OpenMode::Fresh)
        .await
        .expect("first open");
    let second = adapter
        .open(test_target(port), port, OpenMode::Fresh)
        .await
        .expect("second open succeeds as a no-op");
    assert_eq!(first.key, second.key);
    assert_eq!(adapter.sessions().len(), 1);

    adapter.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn runtime_drop_marks_the_ledger_and_aborts_outstanding_calls() {
    let (port, server) = spawn_fake_inspector().await;
    let (adapter, _taps, ledger) = test_adapter();

    let info = adapter
        .open(test_target(port), port, OpenMode::Fresh)
        .await
        .expect("session opens");

    // The server drops the socket without answering this call; the eager
    // session teardown must abort it rather than leave it to time out.
    let err = adapter
        .evaluate("close()", false)
        .await
        .expect_err("aborted call");
    assert_eq!(err.kind, BridgeErrorKind::Protocol);

    let key = info.key.clone();
    assert!(
        wait_for(
            || {
                ledger
                    .get(&key)
                    .map(|state| state.status == ConnectionStatus::Disconnected)
                    .unwrap_or(false)
            },
            Duration::from_secs(2)
        )
        .await,
        "ledger must mark the session disconnected"
    );

    let state = ledger.get(&info.key).expect("ledger entry");
    assert_eq!(state.gaps.len(), 1);
    assert!(state.gaps[0].reconnected_at_ms.is_none());
    assert!(adapter.sessions().is_empty());
    assert_eq!(adapter.pending_calls(), 0);

    adapter.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn connect_timeout_rejects_the_caller() {
    // A TCP listener that never completes the WebSocket handshake.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let (adapter, _taps, _ledger) = test_adapter();
    let mut target = test_target(port);
    target.ws_url = format!("ws://127.0.0.1:{}", port);

    let started = Instant::now();
    let err = adapter
        .open(target, port, OpenMode::Fresh)
        .await
        .expect_err("open must reject");
    assert_eq!(err.kind, BridgeErrorKind::Connect);
    assert!(started.elapsed() >= Duration::from_secs(4));

    hold.abort();
}
