//! The inspector adapter: session registry, inbound dispatch, evaluation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conn_ledger::ConnectionLedger;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use event_tap::{LogRecord, NetworkExchange, TapSet};
use serde_json::{json, Value};
use soulbridge_core_types::{
    session_key, timestamp_ms, BridgeError, BridgeErrorKind, LogLevel, RuntimeTarget,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::discovery;
use crate::events::{self, RuntimeNotification};
use crate::metrics;
use crate::pending::{CallReply, PendingCalls};
use crate::reconnect::{self, ConnectionMetadata};
use crate::transport::{InboundFrame, WsTransport};
use crate::{DeviceResolver, NoopDeviceResolver};

/// Capability-enabling commands sent fire-and-forget on every open.
const ENABLE_METHODS: &[&str] = &["Runtime.enable", "Log.enable", "Network.enable"];

/// Whether an open is caller-initiated or driven by the retry loop. Errors
/// in reconnect mode stay with the controller and never reach an external
/// caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    Fresh,
    Reconnect,
}

/// Events republished on the broadcast bus for external observers.
#[derive(Clone, Debug)]
pub enum BridgeEvent {
    SessionOpened {
        key: String,
    },
    SessionClosed {
        key: String,
        reason: String,
    },
    ConsoleMessage {
        key: String,
        level: LogLevel,
        message: String,
    },
    DeviceResolved {
        key: String,
        device: String,
    },
}

/// Helper mirroring the usual bus construction.
pub fn event_bus(buffer: usize) -> (broadcast::Sender<BridgeEvent>, broadcast::Receiver<BridgeEvent>) {
    broadcast::channel(buffer.max(1))
}

/// Read-only view of one connected session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub key: String,
    pub port: u16,
    pub target: RuntimeTarget,
    pub opened_at_ms: u64,
}

struct SessionHandle {
    serial: u64,
    target: RuntimeTarget,
    port: u16,
    opened_at_ms: u64,
    transport: WsTransport,
    cancel: CancellationToken,
    #[allow(dead_code)]
    read_task: JoinHandle<()>,
}

impl SessionHandle {
    fn info(&self, key: &str) -> SessionInfo {
        SessionInfo {
            key: key.to_string(),
            port: self.port,
            target: self.target.clone(),
            opened_at_ms: self.opened_at_ms,
        }
    }
}

/// One adapter owns every session socket plus the shared pending-call
/// table. Buffers and ledger are injected so independent bridge instances
/// can coexist.
pub struct InspectorAdapter {
    pub(crate) cfg: BridgeConfig,
    pub(crate) taps: Arc<TapSet>,
    pub(crate) ledger: Arc<ConnectionLedger>,
    pub(crate) pending: Arc<PendingCalls>,
    pub(crate) sessions: DashMap<String, SessionHandle>,
    pub(crate) metadata: DashMap<String, ConnectionMetadata>,
    pub(crate) retries: DashMap<String, CancellationToken>,
    devices: DashMap<String, String>,
    resolver: Arc<dyn DeviceResolver>,
    bus: broadcast::Sender<BridgeEvent>,
    serials: AtomicU64,
    shutdown: CancellationToken,
}

impl InspectorAdapter {
    pub fn new(
        cfg: BridgeConfig,
        taps: Arc<TapSet>,
        ledger: Arc<ConnectionLedger>,
        bus: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Self::with_resolver(cfg, taps, ledger, bus, Arc::new(NoopDeviceResolver))
    }

    pub fn with_resolver(
        cfg: BridgeConfig,
        taps: Arc<TapSet>,
        ledger: Arc<ConnectionLedger>,
        bus: broadcast::Sender<BridgeEvent>,
        resolver: Arc<dyn DeviceResolver>,
    ) -> Self {
        Self {
            cfg,
            taps,
            ledger,
            pending: Arc::new(PendingCalls::new()),
            sessions: DashMap::new(),
            metadata: DashMap::new(),
            retries: DashMap::new(),
            devices: DashMap::new(),
            resolver,
            bus,
            serials: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bus.subscribe()
    }

    /// Currently connected sessions, by key lookup only.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect()
    }

    pub fn is_connected(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    /// Companion device handle resolved for a session, when one exists.
    pub fn device_for(&self, key: &str) -> Option<String> {
        self.devices.get(key).map(|entry| entry.value().clone())
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Discover the best target on `port` and open a session to it.
    pub async fn connect(self: &Arc<Self>, port: u16) -> Result<SessionInfo, BridgeError> {
        let targets = discovery::fetch_targets(port).await;
        let target = discovery::select_target(&targets).cloned().ok_or_else(|| {
            BridgeError::new(BridgeErrorKind::Discovery)
                .with_hint(format!("no debuggable runtime on port {}", port))
        })?;
        self.open(target, port, OpenMode::Fresh).await
    }

    /// Open one socket to `target`'s debugger endpoint. A second open for an
    /// already-present key is a no-op returning the existing session.
    pub async fn open(
        self: &Arc<Self>,
        target: RuntimeTarget,
        port: u16,
        mode: OpenMode,
    ) -> Result<SessionInfo, BridgeError> {
        let key = session_key(port, &target.id);
        if mode == OpenMode::Fresh {
            // Manual and automatic reconnection must never race.
            self.cancel_retry(&key);
        }
        if let Some(existing) = self.sessions.get(&key) {
            debug!(target: "inspector-adapter", %key, "session already open; connect is a no-op");
            return Ok(existing.info(&key));
        }

        self.metadata.insert(
            key.clone(),
            ConnectionMetadata {
                port,
                target: target.clone(),
            },
        );

        let connect_timeout = Duration::from_millis(self.cfg.connect_timeout_ms);
        let (transport, inbound_rx) = WsTransport::connect(&target.ws_url, connect_timeout).await?;

        for method in ENABLE_METHODS {
            let id = self.pending.next_id();
            metrics::record_command(method);
            transport.send(Some(id), method, json!({})).await?;
        }

        let serial = self.serials.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let read_task = tokio::spawn(Self::session_loop(
            Arc::clone(self),
            key.clone(),
            serial,
            cancel.clone(),
            inbound_rx,
        ));
        let handle = SessionHandle {
            serial,
            target: target.clone(),
            port,
            opened_at_ms: timestamp_ms(),
            transport: transport.clone(),
            cancel,
            read_task,
        };
        let info = handle.info(&key);

        match self.sessions.entry(key.clone()) {
            Entry::Occupied(existing) => {
                // Lost the race against a concurrent open; this socket is
                // redundant and its loop tears itself down harmlessly.
                transport.close();
                return Ok(existing.get().info(&key));
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        self.ledger.mark_connected(&key);
        let _ = self.bus.send(BridgeEvent::SessionOpened { key: key.clone() });
        info!(target: "inspector-adapter", %key, title = %target.title, "session open");

        if let Some(device_name) = target.device_name.clone() {
            self.spawn_device_resolve(key.clone(), device_name);
        }

        Ok(info)
    }

    /// Evaluate on the first connected session.
    pub async fn evaluate(&self, expression: &str, await_result: bool) -> Result<String, BridgeError> {
        let key = self
            .sessions
            .iter()
            .next()
            .map(|entry| entry.key().clone())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Connect).with_hint("no connected session")
            })?;
        self.evaluate_on(&key, expression, await_result).await
    }

    /// Evaluate an expression on one session, mapping the reply onto a
    /// formatted value or a kind-tagged failure.
    pub async fn evaluate_on(
        &self,
        key: &str,
        expression: &str,
        await_result: bool,
    ) -> Result<String, BridgeError> {
        let transport = self
            .sessions
            .get(key)
            .map(|entry| entry.transport.clone())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Connect)
                    .with_hint(format!("no session for {}", key))
            })?;

        let (id, rx) = self.pending.register(key);
        let params = json!({
            "expression": expression,
            "returnByValue": false,
            "generatePreview": true,
            "awaitPromise": await_result,
        });

        metrics::record_command("Runtime.evaluate");
        let started = Instant::now();
        if let Err(err) = transport.send(Some(id), "Runtime.evaluate", params).await {
            self.pending.discard(id);
            metrics::record_command_failure("Runtime.evaluate");
            return Err(err);
        }

        let deadline = Duration::from_millis(self.cfg.call_timeout_ms);
        let reply = match self.pending.wait(id, rx, deadline).await {
            Ok(reply) => reply,
            Err(err) => {
                metrics::record_command_failure("Runtime.evaluate");
                return Err(err);
            }
        };

        match events::eval_outcome(reply) {
            Ok(value) => {
                metrics::record_command_success("Runtime.evaluate", started.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure("Runtime.evaluate");
                Err(err)
            }
        }
    }

    /// Explicitly close one session without triggering reconnection.
    pub fn close_session(&self, key: &str) -> bool {
        self.cancel_retry(key);
        match self.sessions.get(key) {
            Some(handle) => {
                handle.cancel.cancel();
                handle.transport.close();
                true
            }
            None => false,
        }
    }

    /// Wind everything down: retries, sessions, outstanding calls.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.retries.iter() {
            entry.value().cancel();
        }
        self.retries.clear();

        let keys: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.sessions.remove(&key) {
                handle.transport.close();
                let _ = handle.read_task.await;
                self.ledger.mark_disconnected(&key, "closed by bridge");
            }
        }
        self.pending.fail_all("closed by bridge");
    }

    pub(crate) fn cancel_retry(&self, key: &str) {
        if let Some((_, token)) = self.retries.remove(key) {
            debug!(target: "inspector-adapter", %key, "in-flight retry cancelled");
            token.cancel();
        }
    }

    fn spawn_device_resolve(self: &Arc<Self>, key: String, device_name: String) {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            match adapter.resolver.resolve(&device_name).await {
                Some(device) => {
                    debug!(target: "inspector-adapter", %key, %device, "companion device resolved");
                    adapter.devices.insert(key.clone(), device.clone());
                    let _ = adapter.bus.send(BridgeEvent::DeviceResolved { key, device });
                }
                None => {
                    // Non-fatal: device-control collaborators simply stay
                    // unavailable for this session.
                    debug!(target: "inspector-adapter", %key, %device_name, "companion device not resolved");
                }
            }
        });
    }

    async fn session_loop(
        self: Arc<Self>,
        key: String,
        serial: u64,
        cancel: CancellationToken,
        mut inbound: mpsc::Receiver<InboundFrame>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.teardown_session(&key, serial, "closed by bridge", false);
                    return;
                }
                _ = cancel.cancelled() => {
                    self.teardown_session(&key, serial, "session closed", false);
                    return;
                }
                frame = inbound.recv() => match frame {
                    Some(InboundFrame::Response { id, result, error }) => {
                        if !self.pending.resolve(id, CallReply::Response { result, error }) {
                            debug!(target: "inspector-adapter", id, "response for unknown call id dropped");
                        }
                    }
                    Some(InboundFrame::Notification { method, params }) => {
                        self.handle_notification(&key, &method, params);
                    }
                    Some(InboundFrame::Closed { reason }) => {
                        self.teardown_session(&key, serial, &reason, true);
                        return;
                    }
                    None => {
                        self.teardown_session(&key, serial, "Connection closed", true);
                        return;
                    }
                }
            }
        }
    }

    fn teardown_session(self: &Arc<Self>, key: &str, serial: u64, reason: &str, redial: bool) {
        let removed = self
            .sessions
            .remove_if(key, |_, handle| handle.serial == serial)
            .is_some();
        if !removed {
            // A newer session already owns this key; nothing to record.
            return;
        }

        self.devices.remove(key);
        let failed = self.pending.fail_session(key, reason);
        if failed > 0 {
            debug!(target: "inspector-adapter", %key, failed, "outstanding calls aborted");
        }
        self.ledger.mark_disconnected(key, reason);
        let _ = self.bus.send(BridgeEvent::SessionClosed {
            key: key.to_string(),
            reason: reason.to_string(),
        });
        warn!(target: "inspector-adapter", %key, reason, "session lost");

        if redial && self.cfg.reconnect.enabled && !self.shutdown.is_cancelled() {
            if let Some(meta) = self.metadata.get(key).map(|entry| entry.value().clone()) {
                let token = reconnect::spawn_retry(Arc::clone(self), key.to_string(), meta);
                self.retries.insert(key.to_string(), token);
            }
        }
    }

    fn handle_notification(&self, key: &str, method: &str, params: Value) {
        metrics::record_event();
        match events::decode_notification(method, &params) {
            RuntimeNotification::ConsoleApiCalled {
                kind,
                args,
                timestamp_ms: event_ts,
            } => {
                let message = events::render_console_args(&args);
                if message.trim().is_empty() {
                    return;
                }
                let level = LogLevel::from_protocol(&kind);
                let record = LogRecord::new(event_ts.unwrap_or_else(timestamp_ms), level, message.clone())
                    .with_args(args);
                self.taps.logs.add(record);
                let _ = self.bus.send(BridgeEvent::ConsoleMessage {
                    key: key.to_string(),
                    level,
                    message,
                });
            }
            RuntimeNotification::LogEntryAdded { level, text } => {
                if text.trim().is_empty() {
                    return;
                }
                self.taps.logs.add(LogRecord::new(
                    timestamp_ms(),
                    LogLevel::from_protocol(&level),
                    text,
                ));
            }
            RuntimeNotification::RequestWillBeSent {
                request_id,
                method,
                url,
                headers,
                body,
                timestamp,
            } => {
                if request_id.is_empty() {
                    return;
                }
                let mut exchange = NetworkExchange::new(request_id, method, url, timestamp_ms());
                exchange.request_headers = headers;
                exchange.body = body;
                exchange.timestamp = timestamp;
                self.taps.network.begin(exchange);
            }
            RuntimeNotification::ResponseReceived {
                request_id,
                status,
                headers,
                mime_type,
                timestamp,
            } => {
                self.taps
                    .network
                    .apply_response(&request_id, status, headers, mime_type, timestamp);
            }
            RuntimeNotification::LoadingFinished {
                request_id,
                encoded_data_length,
                timestamp,
            } => {
                self.taps
                    .network
                    .apply_finished(&request_id, encoded_data_length, timestamp);
            }
            RuntimeNotification::LoadingFailed {
                request_id,
                canceled,
                error_text,
                timestamp,
            } => {
                self.taps
                    .network
                    .apply_failed(&request_id, canceled, error_text, timestamp);
            }
            RuntimeNotification::Unknown { method } => {
                debug!(target: "inspector-adapter", %key, method, "unhandled notification");
            }
        }
    }
}
