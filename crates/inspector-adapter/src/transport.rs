//! WebSocket transport actor for one protocol socket.
//!
//! The socket is split into a writer fed by an mpsc of serialized frames and
//! a reader loop that classifies each inbound message into a response, a
//! notification, or the terminal `Closed` marker. The loop exits on close,
//! error, or cancellation; a `Closed` frame is always the last one emitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use soulbridge_core_types::{BridgeError, BridgeErrorKind};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics;

/// Top-level protocol error object carried in a response frame.
#[derive(Clone, Debug, Deserialize)]
pub struct ProtocolError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// One decoded inbound frame.
#[derive(Debug)]
pub enum InboundFrame {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<ProtocolError>,
    },
    Notification {
        method: String,
        params: Value,
    },
    Closed {
        reason: String,
    },
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to a live socket. Cloneable; all clones share the writer channel
/// and the liveness flag.
#[derive(Clone)]
pub struct WsTransport {
    outbound_tx: mpsc::Sender<String>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl WsTransport {
    /// Dial `ws_url`, waiting at most `connect_timeout` for the socket to
    /// reach the open state.
    pub async fn connect(
        ws_url: &str,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<InboundFrame>), BridgeError> {
        let stream = match tokio::time::timeout(connect_timeout, connect_async(ws_url)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                return Err(BridgeError::new(BridgeErrorKind::Connect)
                    .with_hint(err.to_string())
                    .retriable(true));
            }
            Err(_) => {
                return Err(BridgeError::new(BridgeErrorKind::Connect)
                    .with_hint(format!("socket never opened within {:?}", connect_timeout))
                    .retriable(true));
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        tokio::spawn(run_loop(
            stream,
            outbound_rx,
            inbound_tx,
            Arc::clone(&alive),
            cancel.clone(),
        ));

        Ok((
            Self {
                outbound_tx,
                alive,
                cancel,
            },
            inbound_rx,
        ))
    }

    /// Queue one outbound command frame. `id` is omitted for notifications;
    /// commands always carry one even when no response will be awaited.
    pub async fn send(&self, id: Option<u64>, method: &str, params: Value) -> Result<(), BridgeError> {
        let frame = match id {
            Some(id) => json!({ "id": id, "method": method, "params": params }),
            None => json!({ "method": method, "params": params }),
        };
        self.outbound_tx
            .send(frame.to_string())
            .await
            .map_err(|_| {
                BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint("socket writer closed")
                    .retriable(true)
            })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Ask the read loop to wind down; the terminal `Closed` frame still
    /// flows to the receiver.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    stream: WsStream,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break "closed by bridge".to_string(),
            outbound = outbound_rx.recv() => match outbound {
                Some(raw) => {
                    if let Err(err) = sink.send(Message::Text(raw)).await {
                        break format!("send failed: {}", err);
                    }
                }
                None => break "closed by bridge".to_string(),
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(decoded) = classify_frame(&text) {
                        if inbound_tx.send(decoded).await.is_err() {
                            break "frame consumer dropped".to_string();
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break "Connection closed".to_string(),
                Some(Ok(_)) => {} // ping/pong/binary: nothing to route
                Some(Err(err)) => break err.to_string(),
            },
        }
    };

    alive.store(false, Ordering::Relaxed);
    let _ = inbound_tx.send(InboundFrame::Closed { reason }).await;
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProtocolError>,
}

/// Classify one text frame. A numeric `id` marks a response; a `method`
/// marks a notification; anything else is protocol noise and is dropped.
pub(crate) fn classify_frame(text: &str) -> Option<InboundFrame> {
    let frame: WireFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            metrics::record_dropped_frame();
            debug!(target: "inspector-adapter", %err, "unparseable frame dropped");
            return None;
        }
    };

    if let Some(id) = frame.id {
        return Some(InboundFrame::Response {
            id,
            result: frame.result,
            error: frame.error,
        });
    }

    if let Some(method) = frame.method {
        return Some(InboundFrame::Notification {
            method,
            params: frame.params.unwrap_or(Value::Null),
        });
    }

    metrics::record_dropped_frame();
    debug!(target: "inspector-adapter", "frame with neither id nor method dropped");
    None
}
