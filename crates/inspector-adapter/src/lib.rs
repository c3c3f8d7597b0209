//! SoulBridge inspector adapter.
//!
//! Owns the protocol side of the bridge: runtime discovery against local
//! dev servers, one WebSocket session per runtime with automatic
//! reconnection, correlation of remote-evaluation calls, and the inbound
//! dispatch that feeds the shared event buffers.

pub mod build_channel;
pub mod config;
pub mod discovery;
pub mod events;
pub mod metrics;
pub mod pending;
pub mod reconnect;
pub mod transport;

mod adapter;

pub use adapter::{event_bus, BridgeEvent, InspectorAdapter, OpenMode, SessionInfo};
pub use build_channel::{fetch_build_status, BuildChannel};
pub use config::BridgeConfig;
pub use pending::PendingCalls;
pub use reconnect::{ConnectionMetadata, ReconnectPolicy};

use async_trait::async_trait;

/// Resolves the companion device handle for a session's declared device
/// name, for use by out-of-scope device-control collaborators. Resolution
/// runs concurrently with session opening and failure is non-fatal.
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    async fn resolve(&self, device_name: &str) -> Option<String>;
}

/// Default resolver: no device control wired in.
#[derive(Default)]
pub struct NoopDeviceResolver;

#[async_trait]
impl DeviceResolver for NoopDeviceResolver {
    async fn resolve(&self, _device_name: &str) -> Option<String> {
        None
    }
}
