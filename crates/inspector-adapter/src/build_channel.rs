//! Auxiliary build-events channel.
//!
//! A second WebSocket to the bundler's hot-update endpoint carrying
//! loosely-typed lifecycle JSON. Structured events drive the build tap;
//! non-JSON frames run through the clearly-labeled heuristic error scan,
//! logged distinctly from the structured path so it can never mask a
//! structured-decode bug.

use std::sync::Arc;
use std::time::Duration;

use event_tap::build::{scan_for_error, BuildErrorRecord, BuildTap};
use event_tap::TapSet;
use futures::StreamExt;
use serde_json::Value;
use soulbridge_core_types::{BridgeError, BridgeErrorKind};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to the running channel task; cancel-on-drop.
pub struct BuildChannel {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BuildChannel {
    /// Dial `ws://localhost:{port}/events` and start feeding the build tap.
    pub async fn open(
        port: u16,
        taps: Arc<TapSet>,
        connect_timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let url = format!("ws://localhost:{}/events", port);
        let stream = match tokio::time::timeout(connect_timeout, connect_async(&url)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                return Err(BridgeError::new(BridgeErrorKind::Connect)
                    .with_hint(format!("build channel: {}", err))
                    .retriable(true));
            }
            Err(_) => {
                return Err(BridgeError::new(BridgeErrorKind::Connect)
                    .with_hint("build channel socket never opened")
                    .retriable(true));
            }
        };

        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let task = tokio::spawn(async move {
            let (_sink, mut source) = stream.split();
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => ingest_frame(&taps.build, &text),
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(target: "inspector-adapter", "build channel closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            debug!(target: "inspector-adapter", %err, "build channel error");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            task: Some(task),
        })
    }

    /// Gracefully stop the channel task and await its completion.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for BuildChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Decode one frame from the build channel into the tap.
pub(crate) fn ingest_frame(tap: &BuildTap, text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => handle_build_event(tap, &value),
        Err(_) => match scan_for_error(text) {
            Some(snippet) => {
                debug!(
                    target: "inspector-adapter",
                    "heuristic scan matched non-JSON build frame"
                );
                tap.record_error(BuildErrorRecord::new(snippet));
            }
            None => {
                debug!(target: "inspector-adapter", "non-JSON build frame ignored");
            }
        },
    }
}

fn handle_build_event(tap: &BuildTap, value: &Value) {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "bundle_build_started" | "update_start" => tap.build_started(),
        "bundle_build_done" | "bundle_build_succeeded" | "update_done" => tap.build_done(),
        "bundle_build_failed" | "error" => tap.build_failed(error_record(value)),
        "update_error" | "error-message" => tap.record_error(error_record(value)),
        other => {
            debug!(target: "inspector-adapter", event = other, "unhandled build event");
        }
    }
}

fn error_record(value: &Value) -> BuildErrorRecord {
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.get("data").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());

    let mut record = BuildErrorRecord::new(message);
    record.file = value
        .get("fileName")
        .and_then(Value::as_str)
        .map(str::to_string);
    record.line = value
        .get("lineNumber")
        .and_then(Value::as_u64)
        .map(|n| n as u32);
    record.column = value
        .get("columnNumber")
        .and_then(Value::as_u64)
        .map(|n| n as u32);
    record.code_frame = value
        .get("codeFrame")
        .and_then(|frame| frame.as_str().or_else(|| frame.get("content").and_then(Value::as_str)))
        .map(str::to_string);
    record.import_stack = value
        .get("importStack")
        .and_then(Value::as_str)
        .map(str::to_string);
    record
}

/// Poll the bundler's status endpoint. "running" in the body means idle;
/// its absence implies a build in progress.
pub async fn fetch_build_status(port: u16) -> Result<bool, BridgeError> {
    let url = format!("http://localhost:{}/status", port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|err| BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string()))?;
    let body = client
        .get(&url)
        .send()
        .await
        .map_err(|err| {
            BridgeError::new(BridgeErrorKind::Discovery)
                .with_hint(err.to_string())
                .retriable(true)
        })?
        .text()
        .await
        .map_err(|err| BridgeError::new(BridgeErrorKind::Discovery).with_hint(err.to_string()))?;
    Ok(body.contains("running"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_tap::build::BuildErrorKind;
    use serde_json::json;

    #[test]
    fn lifecycle_events_drive_the_status_snapshot() {
        let tap = BuildTap::new(10);
        ingest_frame(&tap, r#"{"type":"bundle_build_started"}"#);
        assert!(tap.status().is_building);
        ingest_frame(&tap, r#"{"type":"bundle_build_done"}"#);
        let status = tap.status();
        assert!(!status.is_building);
        assert!(!status.has_error);
    }

    #[test]
    fn failed_build_records_a_classified_error() {
        let tap = BuildTap::new(10);
        ingest_frame(&tap, r#"{"type":"bundle_build_started"}"#);
        ingest_frame(
            &tap,
            r#"{"type":"bundle_build_failed","message":"Unable to resolve module ./gone"}"#,
        );
        assert!(tap.status().has_error);
        let errors = tap.recent_errors(1);
        assert_eq!(errors[0].kind, BuildErrorKind::Resolution);
    }

    #[test]
    fn update_errors_record_without_toggling_build_state() {
        let tap = BuildTap::new(10);
        ingest_frame(&tap, r#"{"type":"update_error","message":"hmr apply failed"}"#);
        assert!(!tap.status().has_error);
        assert_eq!(tap.len(), 1);
    }

    #[test]
    fn non_json_frames_use_the_heuristic_scan() {
        let tap = BuildTap::new(10);
        ingest_frame(&tap, "bundling failed: SyntaxError in App.tsx");
        assert_eq!(tap.len(), 1);
        assert_eq!(tap.recent_errors(1)[0].kind, BuildErrorKind::Syntax);

        ingest_frame(&tap, "just some chatter");
        assert_eq!(tap.len(), 1, "non-matching noise must be dropped");
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let tap = BuildTap::new(10);
        ingest_frame(&tap, r#"{"type":"client_log","data":["hello"]}"#);
        assert_eq!(tap.len(), 0);
        assert!(!tap.status().is_building);
    }

    #[test]
    fn error_record_extracts_location_fields() {
        let value = json!({
            "type": "error",
            "message": "SyntaxError: Unexpected token",
            "fileName": "App.tsx",
            "lineNumber": 12,
            "columnNumber": 5,
            "codeFrame": {"content": "  11 | x\n> 12 | y"}
        });
        let record = error_record(&value);
        assert_eq!(record.kind, BuildErrorKind::Syntax);
        assert_eq!(record.file.as_deref(), Some("App.tsx"));
        assert_eq!(record.line, Some(12));
        assert_eq!(record.column, Some(5));
        assert!(record.code_frame.unwrap().contains("12 | y"));
    }
}
