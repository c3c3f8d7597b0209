//! Reconnection controller: exponential-backoff redial per session key.
//!
//! Each retry re-derives a fresh runtime target from the stored connection
//! metadata, so an app restart that changed the debugger endpoint (or even
//! the target id) is picked up without the caller re-running discovery.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soulbridge_core_types::RuntimeTarget;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{InspectorAdapter, OpenMode};
use crate::discovery;
use crate::metrics;

/// Backoff schedule and attempt budget for automatic reconnection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Attempt 0 fires immediately; attempt n waits
    /// `min(base · 2^(n−1), max)` milliseconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Everything needed to reopen an equivalent session after a loss. Saved on
/// every connect attempt; the target snapshot may be stale by the time it is
/// used, which is why retries re-fetch the device list.
#[derive(Clone, Debug)]
pub struct ConnectionMetadata {
    pub port: u16,
    pub target: RuntimeTarget,
}

/// Drive the retry loop for one lost session. Returns the token that an
/// explicit connect for the same key uses to cancel the in-flight timer.
pub(crate) fn spawn_retry(
    adapter: Arc<InspectorAdapter>,
    key: String,
    meta: ConnectionMetadata,
) -> CancellationToken {
    let token = CancellationToken::new();
    let loop_token = token.clone();

    tokio::spawn(async move {
        let policy = adapter.cfg.reconnect.clone();
        for attempt in 0..policy.max_attempts {
            adapter.ledger.mark_reconnecting(&key, attempt + 1);
            let delay = policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = loop_token.cancelled() => {
                    debug!(target: "inspector-adapter", %key, "retry cancelled");
                    return;
                }
                _ = sleep(delay) => {}
            }

            metrics::record_reconnect_attempt();
            let targets = discovery::fetch_targets(meta.port).await;
            // Prefer the same logical target; fall back to the selection
            // policy when the app process restarted under a new id.
            let target = targets
                .iter()
                .find(|t| t.id == meta.target.id)
                .cloned()
                .or_else(|| discovery::select_target(&targets).cloned());
            let Some(target) = target else {
                warn!(
                    target: "inspector-adapter",
                    %key,
                    attempt,
                    port = meta.port,
                    "no runtime target visible during reconnect"
                );
                continue;
            };

            match adapter.open(target, meta.port, OpenMode::Reconnect).await {
                Ok(info) => {
                    info!(
                        target: "inspector-adapter",
                        %key,
                        attempt,
                        new_key = %info.key,
                        "reconnected"
                    );
                    if !loop_token.is_cancelled() {
                        adapter.retries.remove(&key);
                    }
                    return;
                }
                Err(err) => {
                    warn!(target: "inspector-adapter", %key, attempt, %err, "reconnect attempt failed");
                }
            }

            if loop_token.is_cancelled() {
                return;
            }
        }

        warn!(target: "inspector-adapter", %key, "reconnection attempts exhausted");
        adapter
            .ledger
            .mark_disconnected(&key, "reconnection attempts exhausted");
        if !loop_token.is_cancelled() {
            adapter.retries.remove(&key);
        }
    });

    token
}
