//! Pending-call table: correlates outbound evaluation requests with their
//! eventual response or timeout.
//!
//! Invariant: a call id resolves exactly once. The entry is removed before
//! its responder fires, so a response arriving after timeout expiry finds
//! nothing and is dropped by the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use soulbridge_core_types::{BridgeError, BridgeErrorKind};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::transport::ProtocolError;

/// Terminal outcome delivered to a waiting caller.
#[derive(Debug)]
pub enum CallReply {
    Response {
        result: Option<Value>,
        error: Option<ProtocolError>,
    },
    Aborted {
        reason: String,
    },
}

struct PendingEntry {
    session_key: String,
    tx: oneshot::Sender<CallReply>,
}

/// Process-wide call table shared by all sessions.
pub struct PendingCalls {
    next_id: AtomicU64,
    entries: DashMap<u64, PendingEntry>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Allocate a call id without registering a completion entry; used for
    /// fire-and-forget commands whose responses are intentionally dropped.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate an id and register a completion entry for it.
    pub fn register(&self, session_key: &str) -> (u64, oneshot::Receiver<CallReply>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingEntry {
                session_key: session_key.to_string(),
                tx,
            },
        );
        (id, rx)
    }

    /// Deliver a reply. Returns false when the id is unknown, i.e. the call
    /// already timed out or was never registered.
    pub fn resolve(&self, id: u64, reply: CallReply) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                let _ = entry.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without delivering anything (send-failure path).
    pub fn discard(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Await the reply for `id`, enforcing the call deadline. Timeout expiry
    /// removes the entry so a late response cannot double-resolve.
    pub async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<CallReply>,
        deadline: Duration,
    ) -> Result<CallReply, BridgeError> {
        match timeout(deadline, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.entries.remove(&id);
                Err(BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint("call responder dropped before completion"))
            }
            Err(_) => {
                self.entries.remove(&id);
                debug!(target: "inspector-adapter", id, "pending call timed out");
                Err(BridgeError::new(BridgeErrorKind::EvalTimeout)
                    .with_hint(format!("no response within {}ms", deadline.as_millis()))
                    .retriable(true))
            }
        }
    }

    /// Abort every outstanding call belonging to one session.
    pub fn fail_session(&self, session_key: &str, reason: &str) -> usize {
        let ids: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| entry.value().session_key == session_key)
            .map(|entry| *entry.key())
            .collect();
        self.fail_ids(&ids, reason)
    }

    /// Abort every outstanding call in the table.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        self.fail_ids(&ids, reason)
    }

    fn fail_ids(&self, ids: &[u64], reason: &str) -> usize {
        let mut failed = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(id) {
                let _ = entry.tx.send(CallReply::Aborted {
                    reason: reason.to_string(),
                });
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_with_the_matching_reply() {
        let calls = PendingCalls::new();
        let (id, rx) = calls.register("8081-page1");
        assert!(calls.resolve(
            id,
            CallReply::Response {
                result: Some(serde_json::json!({"ok": true})),
                error: None
            }
        ));
        let reply = calls.wait(id, rx, Duration::from_secs(1)).await.unwrap();
        match reply {
            CallReply::Response { result, .. } => assert!(result.is_some()),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_dropped() {
        let calls = PendingCalls::new();
        let (id, rx) = calls.register("8081-page1");

        let err = calls
            .wait(id, rx, Duration::from_millis(20))
            .await
            .expect_err("must time out");
        assert_eq!(err.kind, BridgeErrorKind::EvalTimeout);

        // The response arrives after expiry: the entry is gone, so it must
        // be reported as unknown and never double-resolve.
        assert!(!calls.resolve(
            id,
            CallReply::Response {
                result: None,
                error: None
            }
        ));
    }

    #[tokio::test]
    async fn fail_session_only_aborts_that_sessions_calls() {
        let calls = PendingCalls::new();
        let (_id_a, rx_a) = calls.register("8081-a");
        let (_id_b, rx_b) = calls.register("8081-b");

        assert_eq!(calls.fail_session("8081-a", "session lost"), 1);
        match rx_a.await.unwrap() {
            CallReply::Aborted { reason } => assert_eq!(reason, "session lost"),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(calls.len(), 1);
        drop(rx_b);
    }

    #[tokio::test]
    async fn ids_are_monotonically_increasing() {
        let calls = PendingCalls::new();
        let first = calls.next_id();
        let (second, _rx) = calls.register("k");
        assert!(second > first);
    }
}
