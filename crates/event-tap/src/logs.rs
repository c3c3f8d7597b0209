//! Append-only ring of captured console and log entries.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulbridge_core_types::LogLevel;

use crate::ring::BoundedRing;

/// One captured console message or log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

impl LogRecord {
    pub fn new(timestamp_ms: u64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            level,
            message: message.into(),
            args: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }
}

/// Bounded log buffer. Oldest entries are silently dropped past capacity;
/// entries are never reordered.
pub struct LogBuffer {
    ring: Mutex<BoundedRing<LogRecord>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(BoundedRing::new(capacity)),
        }
    }

    pub fn add(&self, record: LogRecord) {
        self.ring.lock().push(record);
    }

    /// Newest `n` entries in chronological order.
    pub fn recent(&self, n: usize) -> Vec<LogRecord> {
        self.ring.lock().tail(n)
    }

    /// Newest `n` entries of the given severity, chronological.
    pub fn by_level(&self, level: LogLevel, n: usize) -> Vec<LogRecord> {
        let guard = self.ring.lock();
        let mut matched: Vec<LogRecord> = guard
            .iter()
            .rev()
            .filter(|rec| rec.level == level)
            .take(n)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Resume from the last occurrence of `marker`: scan from the newest
    /// entry backward for the first message containing it and return
    /// everything from that point forward. No match returns the full set.
    pub fn since_marker(&self, marker: &str) -> Vec<LogRecord> {
        let guard = self.ring.lock();
        let total = guard.len();
        let from_newest = guard
            .iter()
            .rev()
            .position(|rec| rec.message.contains(marker));
        match from_newest {
            Some(offset) => guard.iter().skip(total - offset - 1).cloned().collect(),
            None => guard.snapshot(),
        }
    }

    pub fn clear(&self) -> usize {
        self.ring.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(0, LogLevel::Log, message)
    }

    fn messages(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|rec| rec.message.as_str()).collect()
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let buffer = LogBuffer::new(3);
        for msg in ["a", "b", "c", "d", "e"] {
            buffer.add(record(msg));
        }
        assert_eq!(messages(&buffer.recent(10)), vec!["c", "d", "e"]);
    }

    #[test]
    fn since_marker_resumes_from_last_occurrence() {
        let buffer = LogBuffer::new(10);
        for msg in ["A", "B", "iOS Bundled", "C"] {
            buffer.add(record(msg));
        }
        assert_eq!(
            messages(&buffer.since_marker("iOS Bundled")),
            vec!["iOS Bundled", "C"]
        );
    }

    #[test]
    fn since_marker_prefers_the_newest_occurrence() {
        let buffer = LogBuffer::new(10);
        for msg in ["bundle start", "x", "bundle start", "y"] {
            buffer.add(record(msg));
        }
        assert_eq!(
            messages(&buffer.since_marker("bundle start")),
            vec!["bundle start", "y"]
        );
    }

    #[test]
    fn since_marker_without_match_returns_everything() {
        let buffer = LogBuffer::new(10);
        buffer.add(record("only"));
        assert_eq!(messages(&buffer.since_marker("missing")), vec!["only"]);
    }

    #[test]
    fn by_level_filters_and_keeps_order() {
        let buffer = LogBuffer::new(10);
        buffer.add(LogRecord::new(0, LogLevel::Error, "first"));
        buffer.add(LogRecord::new(1, LogLevel::Log, "noise"));
        buffer.add(LogRecord::new(2, LogLevel::Error, "second"));
        let errors = buffer.by_level(LogLevel::Error, 10);
        assert_eq!(messages(&errors), vec!["first", "second"]);
    }

    #[test]
    fn clear_reports_count() {
        let buffer = LogBuffer::new(10);
        buffer.add(record("a"));
        buffer.add(record("b"));
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
    }
}
