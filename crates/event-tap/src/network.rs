//! Keyed table of in-flight and completed network exchanges.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// One request/response pair observed on the wire. Created on
/// `Network.requestWillBeSent`, mutated in place by the later lifecycle
/// notifications carrying the same request id. An exchange that never sees a
/// terminal notification stays `completed = false`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkExchange {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub request_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed: bool,
    /// Protocol timestamp (seconds) of the originating request event, kept
    /// for elapsed-duration math against later events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub first_seen_ms: u64,
}

impl NetworkExchange {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        first_seen_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            url: url.into(),
            request_headers: BTreeMap::new(),
            body: None,
            status: None,
            response_headers: None,
            mime_type: None,
            size: None,
            duration_ms: None,
            error: None,
            completed: false,
            timestamp: None,
            first_seen_ms,
        }
    }

    fn elapsed_ms(&self, event_timestamp: Option<f64>) -> Option<f64> {
        match (self.timestamp, event_timestamp) {
            (Some(start), Some(end)) => Some((end - start) * 1000.0),
            _ => None,
        }
    }
}

/// Derived statistics computed on demand from the current table contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total: usize,
    pub completed: usize,
    pub by_method: BTreeMap<String, u64>,
    pub by_status_class: BTreeMap<String, u64>,
    pub by_host: BTreeMap<String, u64>,
}

/// Bounded exchange table. Eviction order is insertion order of first sight;
/// mutation is key-scoped and never reorders entries.
pub struct NetworkLog {
    capacity: usize,
    entries: Mutex<VecDeque<NetworkExchange>>,
}

impl NetworkLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a freshly sent request. A second sighting of the same request
    /// id (redirect re-send) updates the existing entry in place instead of
    /// re-inserting it.
    pub fn begin(&self, exchange: NetworkExchange) {
        let mut guard = self.entries.lock();
        if let Some(existing) = guard
            .iter_mut()
            .find(|entry| entry.request_id == exchange.request_id)
        {
            *existing = exchange;
            return;
        }
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(exchange);
    }

    /// Apply `Network.responseReceived`. Unmatched request ids are ignored.
    pub fn apply_response(
        &self,
        request_id: &str,
        status: u16,
        response_headers: BTreeMap<String, String>,
        mime_type: Option<String>,
        event_timestamp: Option<f64>,
    ) {
        self.mutate(request_id, |entry| {
            entry.status = Some(status);
            entry.response_headers = Some(response_headers);
            entry.mime_type = mime_type;
            if let Some(elapsed) = entry.elapsed_ms(event_timestamp) {
                entry.duration_ms = Some(elapsed);
            }
        });
    }

    /// Apply `Network.loadingFinished`, the success-terminal notification.
    pub fn apply_finished(&self, request_id: &str, size: Option<f64>, event_timestamp: Option<f64>) {
        self.mutate(request_id, |entry| {
            if size.is_some() {
                entry.size = size;
            }
            if let Some(elapsed) = entry.elapsed_ms(event_timestamp) {
                entry.duration_ms = Some(elapsed);
            }
            entry.completed = true;
        });
    }

    /// Apply `Network.loadingFailed`, the failure-terminal notification.
    pub fn apply_failed(
        &self,
        request_id: &str,
        canceled: bool,
        error_text: Option<String>,
        event_timestamp: Option<f64>,
    ) {
        self.mutate(request_id, |entry| {
            entry.error = if canceled {
                Some("Canceled".to_string())
            } else {
                Some(error_text.unwrap_or_else(|| "Failed".to_string()))
            };
            if let Some(elapsed) = entry.elapsed_ms(event_timestamp) {
                entry.duration_ms = Some(elapsed);
            }
            entry.completed = true;
        });
    }

    fn mutate(&self, request_id: &str, apply: impl FnOnce(&mut NetworkExchange)) {
        let mut guard = self.entries.lock();
        match guard
            .iter_mut()
            .rev()
            .find(|entry| entry.request_id == request_id)
        {
            Some(entry) => apply(entry),
            None => {
                debug!(target: "event-tap", request_id, "network event for unknown exchange ignored");
            }
        }
    }

    pub fn get(&self, request_id: &str) -> Option<NetworkExchange> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|entry| entry.request_id == request_id)
            .cloned()
    }

    /// Newest `n` exchanges in first-sight order.
    pub fn recent(&self, n: usize) -> Vec<NetworkExchange> {
        let guard = self.entries.lock();
        let skip = guard.len().saturating_sub(n);
        guard.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) -> usize {
        let mut guard = self.entries.lock();
        let removed = guard.len();
        guard.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Counts by method, status class, and host, computed on demand.
    pub fn stats(&self) -> NetworkStats {
        let guard = self.entries.lock();
        let mut stats = NetworkStats {
            total: guard.len(),
            ..NetworkStats::default()
        };
        for entry in guard.iter() {
            if entry.completed {
                stats.completed += 1;
            }
            *stats.by_method.entry(entry.method.clone()).or_insert(0) += 1;
            if let Some(status) = entry.status {
                let class = format!("{}xx", status / 100);
                *stats.by_status_class.entry(class).or_insert(0) += 1;
            }
            if let Ok(parsed) = Url::parse(&entry.url) {
                if let Some(host) = parsed.host_str() {
                    *stats.by_host.entry(host.to_string()).or_insert(0) += 1;
                }
            }
        }
        stats
    }
}
