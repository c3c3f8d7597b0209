//! SoulBridge bounded event buffers.
//!
//! Three independent bounded containers fed by the inspector adapter: an
//! append-only ring of console/log entries, a keyed table of network
//! exchanges, and a ring of classified build errors with a current build
//! status snapshot. External callers only read; the adapter internals own
//! all mutation.

pub mod build;
pub mod logs;
pub mod network;
pub mod ring;

use serde::{Deserialize, Serialize};

pub use build::{BuildErrorKind, BuildErrorRecord, BuildStatus, BuildTap};
pub use logs::{LogBuffer, LogRecord};
pub use network::{NetworkExchange, NetworkLog, NetworkStats};
pub use ring::BoundedRing;

/// Capacities for the three buffers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TapConfig {
    pub log_capacity: usize,
    pub network_capacity: usize,
    pub build_capacity: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1000,
            network_capacity: 500,
            build_capacity: 100,
        }
    }
}

/// The process-wide buffer set, built once and shared via `Arc`.
pub struct TapSet {
    pub logs: LogBuffer,
    pub network: NetworkLog,
    pub build: BuildTap,
}

impl TapSet {
    pub fn new(config: &TapConfig) -> Self {
        Self {
            logs: LogBuffer::new(config.log_capacity),
            network: NetworkLog::new(config.network_capacity),
            build: BuildTap::new(config.build_capacity),
        }
    }
}

impl Default for TapSet {
    fn default() -> Self {
        Self::new(&TapConfig::default())
    }
}
