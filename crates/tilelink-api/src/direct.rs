//! Direct WebSocket channel with auto-reconnect and typed message routing.
//!
//! Connects to the backend's `/ws` endpoint and fans pre-typed envelopes
//! (`telemetry`/`presence`/`status`/`pairing`/...) out through
//! [`tokio::sync::broadcast`] channels. Reconnects automatically on a
//! linear-capped delay curve and exposes its lifecycle through a
//! [`ChannelState`] watch.
//!
//! # Example
//!
//! ```rust,ignore
//! use tilelink_api::direct::DirectChannel;
//! use tilelink_api::reconnect::ReconnectConfig;
//! use url::Url;
//!
//! let channel = DirectChannel::new(
//!     Url::parse("ws://localhost:8000/ws")?,
//!     ReconnectConfig::default(),
//! );
//! channel.connect();
//!
//! let mut telemetry = channel.telemetry();
//! while let Ok(payload) = telemetry.recv().await {
//!     println!("telemetry: {payload}");
//! }
//!
//! channel.disconnect().await;
//! ```

use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::{ChannelError, Envelope, RawEnvelope};
use crate::reconnect::{ChannelState, ReconnectConfig, reconnect_delay};

// ── Channel capacities ───────────────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;
const TYPED_CHANNEL_CAPACITY: usize = 256;

pub(crate) type WsSink =
    SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;
pub(crate) type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ── DirectChannel ────────────────────────────────────────────────────

/// Handle to the direct WebSocket channel.
///
/// Cheaply cloneable; all clones share one underlying connection.
#[derive(Clone)]
pub struct DirectChannel {
    inner: Arc<DirectInner>,
}

struct DirectInner {
    url: Url,
    reconnect: ReconnectConfig,
    state: watch::Sender<ChannelState>,

    messages_tx: broadcast::Sender<Arc<Envelope>>,
    telemetry_tx: broadcast::Sender<Arc<Value>>,
    presence_tx: broadcast::Sender<Arc<Value>>,
    status_tx: broadcast::Sender<Arc<Value>>,
    pairing_tx: broadcast::Sender<Arc<Value>>,
    errors_tx: broadcast::Sender<Arc<ChannelError>>,

    /// Write half of the socket while one is open.
    sink: Mutex<Option<WsSink>>,

    /// Cancellation token of the live run loop, if any. Cancelled tokens
    /// are treated as "not running".
    cancel: StdMutex<Option<CancellationToken>>,
}

impl DirectChannel {
    /// Create a channel handle. Does NOT connect -- call
    /// [`connect()`](Self::connect) to spawn the supervised run loop.
    pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::default());
        let (messages_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (telemetry_tx, _) = broadcast::channel(TYPED_CHANNEL_CAPACITY);
        let (presence_tx, _) = broadcast::channel(TYPED_CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(TYPED_CHANNEL_CAPACITY);
        let (pairing_tx, _) = broadcast::channel(TYPED_CHANNEL_CAPACITY);
        let (errors_tx, _) = broadcast::channel(TYPED_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(DirectInner {
                url,
                reconnect,
                state,
                messages_tx,
                telemetry_tx,
                presence_tx,
                status_tx,
                pairing_tx,
                errors_tx,
                sink: Mutex::new(None),
                cancel: StdMutex::new(None),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the channel and start the reconnection loop.
    ///
    /// No-op while a run loop is already live (connected or connecting).
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.inner.cancel.lock().expect("cancel slot poisoned");
        if slot.as_ref().is_some_and(|token| !token.is_cancelled()) {
            tracing::warn!("direct channel already connected or connecting");
            return;
        }

        let token = CancellationToken::new();
        *slot = Some(token.clone());
        drop(slot);

        self.inner.state.send_modify(|s| {
            s.connecting = true;
            s.last_error = None;
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_loop(&inner, &token).await;
        });
    }

    /// Close the channel intentionally, suppressing auto-reconnect.
    ///
    /// Synchronously invalidates any pending reconnect timer before
    /// touching the socket. Safe to call when never connected.
    pub async fn disconnect(&self) {
        let token = self.inner.cancel.lock().expect("cancel slot poisoned").take();
        if let Some(token) = token {
            token.cancel();
        }

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let close = tungstenite::Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            }));
            if let Err(e) = sink.send(close).await {
                tracing::debug!(error = %e, "close frame not delivered");
            }
        }

        self.inner.state.send_modify(|s| *s = ChannelState::default());
        tracing::debug!("direct channel disconnected");
    }

    /// Send an arbitrary frame to the server.
    ///
    /// Fails with [`Error::NotConnected`] when no socket is open;
    /// transmission failures are logged, surfaced on the error stream,
    /// and returned.
    pub async fn send(&self, frame: &impl Serialize) -> Result<(), Error> {
        let text = serde_json::to_string(frame)?;

        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            let _ = self.inner.errors_tx.send(Arc::new(ChannelError {
                message: "channel is not connected".into(),
                raw: None,
            }));
            return Err(Error::NotConnected);
        };

        sink.send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to send frame");
                let _ = self.inner.errors_tx.send(Arc::new(ChannelError {
                    message: format!("failed to send frame: {e}"),
                    raw: None,
                }));
                Error::WebSocketSend(e.to_string())
            })
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Every envelope, before type routing.
    pub fn messages(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.messages_tx.subscribe()
    }

    /// Node and coordinator telemetry payloads (shape distinguished
    /// downstream by which identity field is present).
    pub fn telemetry(&self) -> broadcast::Receiver<Arc<Value>> {
        self.inner.telemetry_tx.subscribe()
    }

    /// Zone presence events.
    pub fn presence(&self) -> broadcast::Receiver<Arc<Value>> {
        self.inner.presence_tx.subscribe()
    }

    /// Entity connectivity changes.
    pub fn status(&self) -> broadcast::Receiver<Arc<Value>> {
        self.inner.status_tx.subscribe()
    }

    /// Pairing lifecycle notices.
    pub fn pairing(&self) -> broadcast::Receiver<Arc<Value>> {
        self.inner.pairing_tx.subscribe()
    }

    /// Parse failures and server-reported errors, for diagnostics only.
    pub fn errors(&self) -> broadcast::Receiver<Arc<ChannelError>> {
        self.inner.errors_tx.subscribe()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on close/error, linear-capped delay → retry.
async fn run_loop(inner: &DirectInner, cancel: &CancellationToken) {
    loop {
        inner.state.send_modify(|s| s.connecting = true);
        tracing::info!(url = %inner.url, "connecting direct channel");

        let connection = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            c = tokio_tungstenite::connect_async(inner.url.as_str()) => c,
        };

        match connection {
            Ok((ws_stream, _response)) => {
                let (sink, read) = ws_stream.split();
                *inner.sink.lock().await = Some(sink);
                inner.state.send_modify(|s| {
                    s.connected = true;
                    s.connecting = false;
                    s.reconnect_attempts = 0;
                    s.last_error = None;
                });
                tracing::info!("direct channel connected");

                let outcome = read_frames(inner, read, cancel).await;

                inner.sink.lock().await.take();
                inner.state.send_modify(|s| {
                    s.connected = false;
                    s.connecting = false;
                });

                if matches!(outcome, ReadOutcome::Cancelled) {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "direct channel connect failed");
                inner.state.send_modify(|s| {
                    s.connecting = false;
                    s.last_error = Some(e.to_string());
                });
            }
        }

        if !schedule_retry(inner, cancel).await {
            return;
        }
    }
}

/// Wait out the reconnect delay. Returns `false` when the loop must stop
/// (attempt budget exhausted or intentional disconnect).
async fn schedule_retry(inner: &DirectInner, cancel: &CancellationToken) -> bool {
    let attempts = inner.state.borrow().reconnect_attempts;
    if attempts >= inner.reconnect.max_attempts {
        tracing::error!(
            max_attempts = inner.reconnect.max_attempts,
            "max reconnection attempts reached"
        );
        inner.state.send_modify(|s| {
            s.last_error = Some("max reconnection attempts reached".into());
        });
        // Terminal: mark the run loop as dead so connect() works again.
        cancel.cancel();
        return false;
    }

    let attempt = attempts + 1;
    inner.state.send_modify(|s| s.reconnect_attempts = attempt);

    let delay = reconnect_delay(attempt, &inner.reconnect);
    tracing::info!(
        delay_ms = delay.as_millis() as u64,
        attempt,
        max_attempts = inner.reconnect.max_attempts,
        "waiting before reconnect"
    );

    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

enum ReadOutcome {
    Cancelled,
    Closed,
}

/// Read frames from an open socket until it drops or the channel is
/// cancelled.
async fn read_frames(inner: &DirectInner, mut read: WsRead, cancel: &CancellationToken) -> ReadOutcome {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch_text(inner, text.as_str());
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite replies with pongs automatically
                        tracing::trace!("direct channel ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "direct channel closed by server");
                        } else {
                            tracing::info!("direct channel closed by server");
                        }
                        return ReadOutcome::Closed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "direct channel read error");
                        inner.state.send_modify(|s| s.last_error = Some(e.to_string()));
                        return ReadOutcome::Closed;
                    }
                    None => {
                        tracing::info!("direct channel stream ended");
                        return ReadOutcome::Closed;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message routing ──────────────────────────────────────────────────

/// Parse a text frame and route it: global stream first, then by type.
fn dispatch_text(inner: &DirectInner, text: &str) {
    let raw: RawEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse direct-channel envelope");
            let _ = inner.errors_tx.send(Arc::new(ChannelError {
                message: format!("failed to parse message: {e}"),
                raw: Some(text.to_owned()),
            }));
            return;
        }
    };

    let envelope = Envelope {
        kind: raw.kind,
        payload: raw.payload,
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
    };
    let payload = Arc::new(envelope.payload.clone());

    let _ = inner.messages_tx.send(Arc::new(envelope.clone()));

    match envelope.kind.as_str() {
        "telemetry" => {
            let _ = inner.telemetry_tx.send(payload);
        }
        "presence" => {
            let _ = inner.presence_tx.send(payload);
        }
        "status" => {
            let _ = inner.status_tx.send(payload);
        }
        "pairing" => {
            let _ = inner.pairing_tx.send(payload);
        }
        "error" => {
            let message = envelope
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned();
            let _ = inner.errors_tx.send(Arc::new(ChannelError {
                message,
                raw: Some(envelope.payload.to_string()),
            }));
        }
        "command_ack" => {
            // No acknowledgment tracking -- commands are at-most-once.
            tracing::debug!(payload = %envelope.payload, "command ack");
        }
        other => {
            tracing::warn!(kind = other, "unknown message type");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
