//! Runtime discovery: port probing, device-list fetch, target selection.
//!
//! Every failure mode here (unreachable endpoint, malformed JSON, zero
//! qualifying entries) yields an empty result rather than an error, so
//! callers scanning a candidate set simply move on to the next port.

use std::time::Duration;

use serde::Deserialize;
use soulbridge_core_types::RuntimeTarget;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Wire shape of one `/json` device-list entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDescriptor {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
    #[serde(default)]
    device_name: Option<String>,
}

/// Short-timeout TCP liveness probe.
pub async fn probe_port(port: u16, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Parse a `/json` payload into runtime targets, discarding entries without
/// a debugger endpoint.
pub fn parse_descriptors(raw: &str, port: u16) -> Vec<RuntimeTarget> {
    let descriptors: Vec<TargetDescriptor> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(target: "inspector-adapter", port, %err, "device list parse failed");
            return Vec::new();
        }
    };

    descriptors
        .into_iter()
        .filter_map(|desc| {
            let ws_url = desc.web_socket_debugger_url?;
            Some(RuntimeTarget {
                id: desc.id,
                title: desc.title,
                description: desc.description,
                app_id: desc.app_id,
                port,
                device_name: desc.device_name,
                ws_url,
            })
        })
        .collect()
}

/// Fetch the device list from a live dev server. Empty on any failure.
pub async fn fetch_targets(port: u16) -> Vec<RuntimeTarget> {
    let url = format!("http://localhost:{}/json", port);
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            debug!(target: "inspector-adapter", %err, "http client build failed");
            return Vec::new();
        }
    };

    let body = match client.get(&url).send().await {
        Ok(response) => match response.text().await {
            Ok(body) => body,
            Err(err) => {
                debug!(target: "inspector-adapter", port, %err, "device list read failed");
                return Vec::new();
            }
        },
        Err(err) => {
            debug!(target: "inspector-adapter", port, %err, "device list fetch failed");
            return Vec::new();
        }
    };

    parse_descriptors(&body, port)
}

const HERMES_MARKER: &str = "Hermes";
const FAMILY_MARKER: &str = "React Native";
const OVERLAY_MARKERS: &[&str] = &["Reanimated", "Experimental"];

fn is_bridgeless(target: &RuntimeTarget) -> bool {
    target.description.to_ascii_lowercase().contains("bridgeless")
}

fn is_hermes(target: &RuntimeTarget) -> bool {
    target.title.contains(HERMES_MARKER)
}

fn is_primary_family(target: &RuntimeTarget) -> bool {
    target.title.contains(FAMILY_MARKER)
        && !OVERLAY_MARKERS
            .iter()
            .any(|marker| target.title.contains(marker))
}

/// Deterministic target selection, in strict priority order: bridgeless
/// runtimes, then Hermes-titled entries, then the runtime family excluding
/// secondary overlay runtimes, then the first entry as last resort.
pub fn select_target(targets: &[RuntimeTarget]) -> Option<&RuntimeTarget> {
    targets
        .iter()
        .find(|t| is_bridgeless(t))
        .or_else(|| targets.iter().find(|t| is_hermes(t)))
        .or_else(|| targets.iter().find(|t| is_primary_family(t)))
        .or_else(|| targets.first())
}

/// Probe every candidate port and collect the targets of the live ones.
pub async fn scan(ports: &[u16], probe_timeout: Duration) -> Vec<RuntimeTarget> {
    let mut found = Vec::new();
    for &port in ports {
        if !probe_port(port, probe_timeout).await {
            continue;
        }
        found.extend(fetch_targets(port).await);
    }
    found
}
