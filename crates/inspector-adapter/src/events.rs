//! Inbound notification decoding and remote-object rendering.
//!
//! Each notification is a tagged variant over the fixed set of known method
//! names, with `Unknown` kept for forward compatibility: new methods flow
//! through as ignorable values instead of decode errors.

use std::collections::BTreeMap;

use serde_json::Value;
use soulbridge_core_types::{BridgeError, BridgeErrorKind};

use crate::pending::CallReply;

/// Decoded protocol notification.
#[derive(Clone, Debug)]
pub enum RuntimeNotification {
    ConsoleApiCalled {
        kind: String,
        args: Vec<Value>,
        timestamp_ms: Option<u64>,
    },
    LogEntryAdded {
        level: String,
        text: String,
    },
    RequestWillBeSent {
        request_id: String,
        method: String,
        url: String,
        headers: BTreeMap<String, String>,
        body: Option<String>,
        timestamp: Option<f64>,
    },
    ResponseReceived {
        request_id: String,
        status: u16,
        headers: BTreeMap<String, String>,
        mime_type: Option<String>,
        timestamp: Option<f64>,
    },
    LoadingFinished {
        request_id: String,
        encoded_data_length: Option<f64>,
        timestamp: Option<f64>,
    },
    LoadingFailed {
        request_id: String,
        canceled: bool,
        error_text: Option<String>,
        timestamp: Option<f64>,
    },
    Unknown {
        method: String,
    },
}

fn string_at(params: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = params;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_str().map(str::to_string)
}

fn f64_at(params: &Value, path: &[&str]) -> Option<f64> {
    let mut cursor = params;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_f64()
}

fn headers_at(params: &Value, path: &[&str]) -> BTreeMap<String, String> {
    let mut cursor = params;
    for key in path {
        match cursor.get(key) {
            Some(next) => cursor = next,
            None => return BTreeMap::new(),
        }
    }
    cursor
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Route a notification by its method name into the tagged variant set.
pub fn decode_notification(method: &str, params: &Value) -> RuntimeNotification {
    match method {
        "Runtime.consoleAPICalled" => RuntimeNotification::ConsoleApiCalled {
            kind: string_at(params, &["type"]).unwrap_or_else(|| "log".to_string()),
            args: params
                .get("args")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            timestamp_ms: f64_at(params, &["timestamp"]).map(|ts| ts as u64),
        },
        "Log.entryAdded" => RuntimeNotification::LogEntryAdded {
            level: string_at(params, &["entry", "level"]).unwrap_or_else(|| "log".to_string()),
            text: string_at(params, &["entry", "text"]).unwrap_or_default(),
        },
        "Network.requestWillBeSent" => RuntimeNotification::RequestWillBeSent {
            request_id: string_at(params, &["requestId"]).unwrap_or_default(),
            method: string_at(params, &["request", "method"]).unwrap_or_else(|| "GET".to_string()),
            url: string_at(params, &["request", "url"]).unwrap_or_default(),
            headers: headers_at(params, &["request", "headers"]),
            body: string_at(params, &["request", "postData"]),
            timestamp: f64_at(params, &["timestamp"]),
        },
        "Network.responseReceived" => RuntimeNotification::ResponseReceived {
            request_id: string_at(params, &["requestId"]).unwrap_or_default(),
            status: f64_at(params, &["response", "status"]).unwrap_or(0.0) as u16,
            headers: headers_at(params, &["response", "headers"]),
            mime_type: string_at(params, &["response", "mimeType"]),
            timestamp: f64_at(params, &["timestamp"]),
        },
        "Network.loadingFinished" => RuntimeNotification::LoadingFinished {
            request_id: string_at(params, &["requestId"]).unwrap_or_default(),
            encoded_data_length: f64_at(params, &["encodedDataLength"]),
            timestamp: f64_at(params, &["timestamp"]),
        },
        "Network.loadingFailed" => RuntimeNotification::LoadingFailed {
            request_id: string_at(params, &["requestId"]).unwrap_or_default(),
            canceled: params
                .get("canceled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            error_text: string_at(params, &["errorText"]),
            timestamp: f64_at(params, &["timestamp"]),
        },
        other => RuntimeNotification::Unknown {
            method: other.to_string(),
        },
    }
}

/// Render one console argument. Primitives render as their literal value;
/// structured values fall back to description/preview text, then to a
/// generic placeholder.
pub fn render_console_arg(arg: &Value) -> String {
    if let Some(value) = arg.get("value") {
        match value {
            Value::String(s) => return s.clone(),
            Value::Null => {}
            other => return other.to_string(),
        }
    }
    if arg.get("type").and_then(Value::as_str) == Some("undefined") {
        return "undefined".to_string();
    }
    if arg.get("subtype").and_then(Value::as_str) == Some("null") {
        return "null".to_string();
    }
    if let Some(description) = arg.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    if let Some(preview) = arg.get("preview").and_then(|p| p.get("description")).and_then(Value::as_str) {
        return preview.to_string();
    }
    "[object]".to_string()
}

/// Concatenate the rendering of every console argument into one message.
pub fn render_console_args(args: &[Value]) -> String {
    args.iter()
        .map(render_console_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remote-object formatting for evaluation results.
pub fn format_remote_object(obj: &Value) -> String {
    let obj_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
    if obj_type == "undefined" {
        return "undefined".to_string();
    }
    let subtype = obj.get("subtype").and_then(Value::as_str);
    if subtype == Some("null") {
        return "null".to_string();
    }
    if let Some(value) = obj.get("value") {
        match value {
            Value::Null => {}
            Value::String(s) => return s.clone(),
            Value::Object(_) | Value::Array(_) => {
                return serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            }
            other => return other.to_string(),
        }
    }
    if let Some(description) = obj.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    if let Some(unserializable) = obj.get("unserializableValue").and_then(Value::as_str) {
        return unserializable.to_string();
    }
    match subtype {
        Some(subtype) => format!("[{} {}]", obj_type, subtype),
        None => format!("[{}]", obj_type),
    }
}

/// Map a call reply onto the evaluation outcome: protocol error, thrown
/// exception, or a formatted value. Failures are values, never panics.
pub fn eval_outcome(reply: CallReply) -> Result<String, BridgeError> {
    match reply {
        CallReply::Aborted { reason } => {
            Err(BridgeError::new(BridgeErrorKind::Protocol).with_hint(reason))
        }
        CallReply::Response {
            error: Some(protocol_error),
            ..
        } => Err(BridgeError::new(BridgeErrorKind::Evaluation).with_hint(protocol_error.message)),
        CallReply::Response {
            result: Some(result),
            ..
        } => {
            if let Some(details) = result.get("exceptionDetails") {
                let message = details
                    .get("exception")
                    .and_then(|e| e.get("description"))
                    .and_then(Value::as_str)
                    .or_else(|| details.get("text").and_then(Value::as_str))
                    .unwrap_or("evaluation threw");
                return Err(
                    BridgeError::new(BridgeErrorKind::Evaluation).with_hint(message.to_string())
                );
            }
            let remote = result.get("result").cloned().unwrap_or(Value::Null);
            Ok(format_remote_object(&remote))
        }
        CallReply::Response { result: None, .. } => Err(BridgeError::new(
            BridgeErrorKind::Protocol,
        )
        .with_hint("response carried neither result nor error")),
    }
}
