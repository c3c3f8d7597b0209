use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeMetricsSnapshot {
    pub commands: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
    pub events: u64,
    pub dropped_frames: u64,
    pub reconnect_attempts: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static COMMAND_SUCCESS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static DROPPED_FRAMES: AtomicU64 = AtomicU64::new(0);
static RECONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref BRIDGE_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("soulbridge_commands_total", "Total protocol commands sent"),
        &["method"]
    )
    .unwrap();
    static ref BRIDGE_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "soulbridge_command_failures_total",
            "Total protocol command failures"
        ),
        &["method"]
    )
    .unwrap();
    static ref BRIDGE_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "soulbridge_command_duration_seconds",
            "Protocol command latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref BRIDGE_EVENTS_TOTAL: IntCounter =
        IntCounter::new("soulbridge_events_total", "Total inbound notifications handled").unwrap();
    static ref BRIDGE_DROPPED_FRAMES_TOTAL: IntCounter = IntCounter::new(
        "soulbridge_dropped_frames_total",
        "Total malformed inbound frames dropped",
    )
    .unwrap();
    static ref BRIDGE_RECONNECT_ATTEMPTS_TOTAL: IntCounter = IntCounter::new(
        "soulbridge_reconnect_attempts_total",
        "Total reconnection attempts",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register bridge metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, BRIDGE_COMMANDS_TOTAL.clone());
    register(registry, BRIDGE_COMMAND_FAILURES_TOTAL.clone());
    register(registry, BRIDGE_COMMAND_DURATION.clone());
    register(registry, BRIDGE_EVENTS_TOTAL.clone());
    register(registry, BRIDGE_DROPPED_FRAMES_TOTAL.clone());
    register(registry, BRIDGE_RECONNECT_ATTEMPTS_TOTAL.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    BRIDGE_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMAND_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    BRIDGE_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    BRIDGE_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

pub fn record_event() {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    BRIDGE_EVENTS_TOTAL.inc();
}

pub fn record_dropped_frame() {
    DROPPED_FRAMES.fetch_add(1, Ordering::Relaxed);
    BRIDGE_DROPPED_FRAMES_TOTAL.inc();
}

pub fn record_reconnect_attempt() {
    RECONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
    BRIDGE_RECONNECT_ATTEMPTS_TOTAL.inc();
}

pub fn snapshot() -> BridgeMetricsSnapshot {
    BridgeMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        command_success: COMMAND_SUCCESS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        dropped_frames: DROPPED_FRAMES.load(Ordering::Relaxed),
        reconnect_attempts: RECONNECT_ATTEMPTS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    COMMANDS.store(0, Ordering::Relaxed);
    COMMAND_SUCCESS.store(0, Ordering::Relaxed);
    COMMAND_FAILURES.store(0, Ordering::Relaxed);
    COMMAND_LATENCY_TOTAL_US.store(0, Ordering::Relaxed);
    EVENTS.store(0, Ordering::Relaxed);
    DROPPED_FRAMES.store(0, Ordering::Relaxed);
    RECONNECT_ATTEMPTS.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_command_outcomes() {
        reset();
        record_command("Runtime.evaluate");
        record_command_success("Runtime.evaluate", Duration::from_micros(220));
        record_command_failure("Runtime.evaluate");
        record_event();
        record_dropped_frame();
        record_reconnect_attempt();
        let snap = snapshot();
        assert_eq!(snap.commands, 1);
        assert_eq!(snap.command_success, 1);
        assert_eq!(snap.command_failures, 1);
        assert_eq!(snap.command_latency_total_us, 220);
        assert_eq!(snap.events, 1);
        assert_eq!(snap.dropped_frames, 1);
        assert_eq!(snap.reconnect_attempts, 1);
    }
}
