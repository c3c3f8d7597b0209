//! Shared primitives for the SoulBridge debug bridge.
//!
//! Everything the member crates agree on lives here: the bridge error type,
//! the discovered runtime-target model, log severity tiers, and the session
//! key convention.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error categories surfaced by the bridge.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum BridgeErrorKind {
    #[error("discovery failed")]
    Discovery,
    #[error("connect failed")]
    Connect,
    #[error("evaluation failed")]
    Evaluation,
    #[error("evaluation timed out")]
    EvalTimeout,
    #[error("protocol i/o failure")]
    Protocol,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to higher layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for BridgeError {}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Severity tiers for captured console and log output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
    Info,
    Debug,
}

impl LogLevel {
    /// Map the protocol's severity vocabulary onto the five tiers.
    /// Unrecognized values fall back to `Log`.
    pub fn from_protocol(raw: &str) -> Self {
        match raw {
            "warning" | "warn" => Self::Warn,
            "error" => Self::Error,
            "info" => Self::Info,
            "debug" | "verbose" => Self::Debug,
            _ => Self::Log,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One debuggable runtime exposed by a bundler or dev server. Immutable once
/// discovered; re-fetched on every discovery pass, never mutated in place.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeTarget {
    pub id: String,
    pub title: String,
    pub description: String,
    pub app_id: Option<String>,
    pub port: u16,
    pub device_name: Option<String>,
    pub ws_url: String,
}

impl RuntimeTarget {
    /// Session registry key for this target on its owning port.
    pub fn session_key(&self) -> String {
        session_key(self.port, &self.id)
    }
}

/// Canonical session key: `"{port}-{targetId}"`.
pub fn session_key(port: u16, target_id: &str) -> String {
    format!("{}-{}", port, target_id)
}

/// Milliseconds since the unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
