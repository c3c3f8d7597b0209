//! SoulBridge library
//!
//! Wires the bounded event buffers, the connection ledger and the inspector
//! adapter into one owned context object, and re-exports the pieces
//! consumers read from. No ambient globals: independent bridge instances
//! can coexist and be tested in isolation.

use std::sync::Arc;
use std::time::Duration;

use conn_ledger::{ConnectionLedger, ConnectionState};
use event_tap::{BuildStatus, BuildTap, LogBuffer, NetworkLog, TapSet};
use inspector_adapter::event_bus;
use soulbridge_core_types::BridgeError;
use tokio::sync::broadcast;

pub use conn_ledger::{ConnectionGap, ConnectionStatus};
pub use event_tap::{BuildErrorRecord, LogRecord, NetworkExchange, NetworkStats, TapConfig};
pub use inspector_adapter::{
    discovery, fetch_build_status, BridgeConfig, BridgeEvent, BuildChannel, InspectorAdapter,
    ReconnectPolicy, SessionInfo,
};
pub use soulbridge_core_types::{BridgeErrorKind, LogLevel, RuntimeTarget};

/// Top-level settings: adapter tuning plus buffer capacities.
#[derive(Clone, Debug, Default)]
pub struct BridgeSettings {
    pub adapter: BridgeConfig,
    pub taps: TapConfig,
}

/// One bridge instance owning its buffers, ledger and adapter.
pub struct SoulBridge {
    taps: Arc<TapSet>,
    ledger: Arc<ConnectionLedger>,
    adapter: Arc<InspectorAdapter>,
}

impl SoulBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        let taps = Arc::new(TapSet::new(&settings.taps));
        let ledger = Arc::new(ConnectionLedger::new());
        let (bus, _rx) = event_bus(256);
        let adapter = Arc::new(InspectorAdapter::new(
            settings.adapter,
            Arc::clone(&taps),
            Arc::clone(&ledger),
            bus,
        ));
        Self {
            taps,
            ledger,
            adapter,
        }
    }

    /// Discover the best runtime on `port` and open a session to it.
    pub async fn connect(&self, port: u16) -> Result<SessionInfo, BridgeError> {
        self.adapter.connect(port).await
    }

    /// Execute an expression on the connected runtime and await a formatted
    /// result or a structured failure.
    pub async fn evaluate(&self, expression: &str, await_result: bool) -> Result<String, BridgeError> {
        self.adapter.evaluate(expression, await_result).await
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.adapter.sessions()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.taps.logs
    }

    pub fn network(&self) -> &NetworkLog {
        &self.taps.network
    }

    pub fn build(&self) -> &BuildTap {
        &self.taps.build
    }

    pub fn build_status(&self) -> BuildStatus {
        self.taps.build.status()
    }

    pub fn connection_state(&self, key: &str) -> Option<ConnectionState> {
        self.ledger.get(key)
    }

    pub fn connection_states(&self) -> Vec<(String, ConnectionState)> {
        self.ledger.all()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.adapter.subscribe()
    }

    pub fn adapter(&self) -> &Arc<InspectorAdapter> {
        &self.adapter
    }

    /// Attach the auxiliary build-events channel on `port`.
    pub async fn open_build_channel(&self, port: u16) -> Result<BuildChannel, BridgeError> {
        let connect_timeout = Duration::from_millis(self.adapter.config().connect_timeout_ms);
        BuildChannel::open(port, Arc::clone(&self.taps), connect_timeout).await
    }

    pub async fn shutdown(&self) {
        self.adapter.shutdown().await;
    }
}

impl Default for SoulBridge {
    fn default() -> Self {
        Self::new(BridgeSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bridge_starts_empty() {
        let bridge = SoulBridge::default();
        assert!(bridge.sessions().is_empty());
        assert!(bridge.logs().is_empty());
        assert!(bridge.network().is_empty());
        assert!(bridge.connection_states().is_empty());
        assert!(!bridge.build_status().is_building);
    }

    #[tokio::test]
    async fn evaluate_without_a_session_reports_not_connected() {
        let bridge = SoulBridge::default();
        let err = bridge.evaluate("1 + 1", false).await.expect_err("no session");
        assert_eq!(err.kind, BridgeErrorKind::Connect);
    }
}
