//! Build-error ring and current build status snapshot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbridge_core_types::timestamp_ms;
use tracing::debug;

use crate::ring::BoundedRing;

/// Classified build failure category.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildErrorKind {
    Syntax,
    Resolution,
    Transform,
    Runtime,
    Unknown,
}

impl BuildErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Resolution => "resolution",
            Self::Transform => "transform",
            Self::Runtime => "runtime",
            Self::Unknown => "unknown",
        }
    }
}

/// Classify a build failure message by its leading indicators.
pub fn classify_build_error(message: &str) -> BuildErrorKind {
    if message.contains("SyntaxError") || message.contains("Unexpected token") {
        BuildErrorKind::Syntax
    } else if message.contains("Unable to resolve")
        || message.contains("Cannot find module")
        || message.contains("Module not found")
    {
        BuildErrorKind::Resolution
    } else if message.contains("TransformError") {
        BuildErrorKind::Transform
    } else if message.contains("ReferenceError") || message.contains("TypeError") {
        BuildErrorKind::Runtime
    } else {
        BuildErrorKind::Unknown
    }
}

const ERROR_MARKERS: &[&str] = &["error", "Error", "failed", "Failed", "exception", "Exception"];
const SCAN_SNIPPET_MAX: usize = 500;

/// Best-effort scan of a non-JSON frame for error-indicating substrings.
/// This is the explicit fallback path for the loosely-typed build channel;
/// structured decode failures are logged separately and never routed here.
pub fn scan_for_error(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if ERROR_MARKERS.iter().any(|marker| trimmed.contains(marker)) {
        let mut snippet = trimmed.to_string();
        if snippet.len() > SCAN_SNIPPET_MAX {
            snippet.truncate(SCAN_SNIPPET_MAX);
        }
        Some(snippet)
    } else {
        None
    }
}

/// One classified build failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildErrorRecord {
    pub timestamp_ms: u64,
    pub kind: BuildErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_stack: Option<String>,
}

impl BuildErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            timestamp_ms: timestamp_ms(),
            kind: classify_build_error(&message),
            message,
            file: None,
            line: None,
            column: None,
            code_frame: None,
            import_stack: None,
        }
    }
}

/// Current build snapshot; a single mutable record, not a history.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildStatus {
    pub is_building: bool,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time_ms: Option<u64>,
}

#[derive(Default)]
struct StatusInner {
    status: BuildStatus,
    started_ms: Option<u64>,
}

/// Bounded build-error buffer plus the live status snapshot.
pub struct BuildTap {
    errors: Mutex<BoundedRing<BuildErrorRecord>>,
    inner: Mutex<StatusInner>,
}

impl BuildTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            errors: Mutex::new(BoundedRing::new(capacity)),
            inner: Mutex::new(StatusInner::default()),
        }
    }

    pub fn build_started(&self) {
        let mut guard = self.inner.lock();
        let now = timestamp_ms();
        guard.started_ms = Some(now);
        guard.status.is_building = true;
    }

    pub fn build_done(&self) {
        let mut guard = self.inner.lock();
        let now = timestamp_ms();
        guard.status.is_building = false;
        guard.status.has_error = false;
        guard.status.last_build_ms = Some(now);
        guard.status.build_time_ms = guard.started_ms.take().map(|start| now.saturating_sub(start));
    }

    pub fn build_failed(&self, record: BuildErrorRecord) {
        {
            let mut guard = self.inner.lock();
            let now = timestamp_ms();
            guard.status.is_building = false;
            guard.status.has_error = true;
            guard.status.last_build_ms = Some(now);
            guard.status.build_time_ms =
                guard.started_ms.take().map(|start| now.saturating_sub(start));
        }
        self.record_error(record);
    }

    /// Append an error without touching the build lifecycle snapshot (used
    /// by the heuristic scan path and by update errors outside a build).
    pub fn record_error(&self, record: BuildErrorRecord) {
        debug!(
            target: "event-tap",
            kind = record.kind.as_str(),
            "build error recorded"
        );
        self.errors.lock().push(record);
    }

    pub fn status(&self) -> BuildStatus {
        self.inner.lock().status.clone()
    }

    /// Newest `n` errors in chronological order.
    pub fn recent_errors(&self, n: usize) -> Vec<BuildErrorRecord> {
        self.errors.lock().tail(n)
    }

    pub fn clear(&self) -> usize {
        self.errors.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}
