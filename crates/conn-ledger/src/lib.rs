//! Per-session connection state ledger.
//!
//! One `ConnectionState` per session key, surviving session teardown so
//! reconnection can resume attempt counting. Disconnect/reconnect intervals
//! are recorded as a capped gap history for observability and for gap-aware
//! consumers: across a reconnect no ordering continuity is guaranteed, and
//! the gap itself is the signal that it was broken.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbridge_core_types::timestamp_ms;
use tracing::debug;

/// Connection status for one session key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// A recorded interval during which the session was down. Opened on close,
/// closed when the next successful session for the same key opens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionGap {
    pub disconnected_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnected_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub reason: String,
}

/// Status, timestamps, attempt counter and gap history for one session key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_disconnect_ms: Option<u64>,
    pub reconnection_attempts: u32,
    pub gaps: Vec<ConnectionGap>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_connected_ms: None,
            last_disconnect_ms: None,
            reconnection_attempts: 0,
            gaps: Vec::new(),
        }
    }

    fn open_gap(&self) -> Option<usize> {
        self.gaps
            .iter()
            .rposition(|gap| gap.reconnected_at_ms.is_none())
    }
}

const DEFAULT_GAP_CAPACITY: usize = 10;

/// Ledger of connection states keyed by `"{port}-{targetId}"`. Entries are
/// created lazily and never removed by session teardown.
pub struct ConnectionLedger {
    states: DashMap<String, Mutex<ConnectionState>>,
    gap_capacity: usize,
}

impl ConnectionLedger {
    pub fn new() -> Self {
        Self::with_gap_capacity(DEFAULT_GAP_CAPACITY)
    }

    pub fn with_gap_capacity(gap_capacity: usize) -> Self {
        Self {
            states: DashMap::new(),
            gap_capacity: gap_capacity.max(1),
        }
    }

    fn with_state<R>(&self, key: &str, apply: impl FnOnce(&mut ConnectionState) -> R) -> R {
        let entry = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(ConnectionState::new()));
        let mut guard = entry.lock();
        apply(&mut guard)
    }

    /// A session for `key` reached the open state. Closes any open gap and
    /// resets the attempt counter.
    pub fn mark_connected(&self, key: &str) {
        let now = timestamp_ms();
        self.with_state(key, |state| {
            if let Some(idx) = state.open_gap() {
                let gap = &mut state.gaps[idx];
                gap.reconnected_at_ms = Some(now);
                gap.duration_ms = Some(now.saturating_sub(gap.disconnected_at_ms));
                debug!(target: "conn-ledger", key, duration_ms = gap.duration_ms, "gap closed");
            }
            state.status = ConnectionStatus::Connected;
            state.last_connected_ms = Some(now);
            state.reconnection_attempts = 0;
        });
    }

    /// The session for `key` closed or errored. Opens a gap unless one is
    /// already open (repeated close signals collapse into the first gap).
    pub fn mark_disconnected(&self, key: &str, reason: &str) {
        let now = timestamp_ms();
        self.with_state(key, |state| {
            state.status = ConnectionStatus::Disconnected;
            state.last_disconnect_ms = Some(now);
            if state.open_gap().is_none() {
                if state.gaps.len() == self.gap_capacity {
                    state.gaps.remove(0);
                }
                state.gaps.push(ConnectionGap {
                    disconnected_at_ms: now,
                    reconnected_at_ms: None,
                    duration_ms: None,
                    reason: reason.to_string(),
                });
                debug!(target: "conn-ledger", key, reason, "gap opened");
            }
        });
    }

    /// A reconnection attempt is being scheduled for `key`.
    pub fn mark_reconnecting(&self, key: &str, attempt: u32) {
        self.with_state(key, |state| {
            state.status = ConnectionStatus::Reconnecting;
            state.reconnection_attempts = attempt;
        });
    }

    pub fn get(&self, key: &str) -> Option<ConnectionState> {
        self.states.get(key).map(|entry| entry.lock().clone())
    }

    pub fn all(&self) -> Vec<(String, ConnectionState)> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for ConnectionLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_then_reopen_produces_one_closed_gap() {
        let ledger = ConnectionLedger::new();
        ledger.mark_connected("8081-page1");
        ledger.mark_disconnected("8081-page1", "Connection closed");
        ledger.mark_connected("8081-page1");

        let state = ledger.get("8081-page1").unwrap();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.gaps.len(), 1);
        let gap = &state.gaps[0];
        let reconnected = gap.reconnected_at_ms.expect("gap must be closed");
        assert_eq!(
            gap.duration_ms,
            Some(reconnected.saturating_sub(gap.disconnected_at_ms))
        );
    }

    #[test]
    fn close_without_reopen_leaves_gap_open() {
        let ledger = ConnectionLedger::new();
        ledger.mark_disconnected("k", "socket error");
        let state = ledger.get("k").unwrap();
        assert_eq!(state.gaps.len(), 1);
        assert!(state.gaps[0].reconnected_at_ms.is_none());
        assert!(state.gaps[0].duration_ms.is_none());
        assert_eq!(state.gaps[0].reason, "socket error");
    }

    #[test]
    fn repeated_close_signals_collapse_into_one_gap() {
        let ledger = ConnectionLedger::new();
        ledger.mark_disconnected("k", "Connection closed");
        ledger.mark_disconnected("k", "Connection closed");
        assert_eq!(ledger.get("k").unwrap().gaps.len(), 1);
    }

    #[test]
    fn reconnect_resets_attempt_counter() {
        let ledger = ConnectionLedger::new();
        ledger.mark_disconnected("k", "Connection closed");
        ledger.mark_reconnecting("k", 3);
        assert_eq!(ledger.get("k").unwrap().reconnection_attempts, 3);
        assert_eq!(
            ledger.get("k").unwrap().status,
            ConnectionStatus::Reconnecting
        );

        ledger.mark_connected("k");
        assert_eq!(ledger.get("k").unwrap().reconnection_attempts, 0);
    }

    #[test]
    fn gap_history_is_capped() {
        let ledger = ConnectionLedger::with_gap_capacity(2);
        for n in 0..4 {
            ledger.mark_disconnected("k", &format!("close {n}"));
            ledger.mark_connected("k");
        }
        let state = ledger.get("k").unwrap();
        assert_eq!(state.gaps.len(), 2);
        assert_eq!(state.gaps[0].reason, "close 2");
        assert_eq!(state.gaps[1].reason, "close 3");
    }

    #[test]
    fn state_survives_teardown_for_attempt_counting() {
        let ledger = ConnectionLedger::new();
        ledger.mark_connected("k");
        ledger.mark_disconnected("k", "Connection closed");
        ledger.mark_reconnecting("k", 1);
        ledger.mark_reconnecting("k", 2);
        let state = ledger.get("k").unwrap();
        assert_eq!(state.reconnection_attempts, 2);
        assert!(state.last_connected_ms.is_some());
        assert!(state.last_disconnect_ms.is_some());
    }
}
