//! Configuration for the inspector adapter.

use std::env;

use serde::{Deserialize, Serialize};

use crate::reconnect::ReconnectPolicy;

/// Tuning knobs for discovery, session opening and call correlation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Candidate dev-server ports scanned by discovery.
    pub candidate_ports: Vec<u16>,
    /// TCP liveness probe budget per port.
    pub probe_timeout_ms: u64,
    /// How long a socket may take to reach the open state.
    pub connect_timeout_ms: u64,
    /// Deadline for a remote-evaluation response.
    pub call_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            candidate_ports: resolve_candidate_ports(),
            probe_timeout_ms: 1_000,
            connect_timeout_ms: 5_000,
            call_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Well-known dev-server ports: Metro defaults plus the Expo pair and the
/// conventional remote-debugging port.
pub const WELL_KNOWN_PORTS: &[u16] = &[8081, 8082, 19000, 19001, 9222];

fn resolve_candidate_ports() -> Vec<u16> {
    match env::var("SOULBRIDGE_PORTS") {
        Ok(raw) => {
            let ports: Vec<u16> = raw
                .split(',')
                .filter_map(|part| part.trim().parse::<u16>().ok())
                .collect();
            if ports.is_empty() {
                WELL_KNOWN_PORTS.to_vec()
            } else {
                ports
            }
        }
        Err(_) => WELL_KNOWN_PORTS.to_vec(),
    }
}
