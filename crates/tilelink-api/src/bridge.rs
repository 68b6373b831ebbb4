//! MQTT-over-WebSocket bridge channel with topic multiplexing.
//!
//! The backend tunnels broker-style publish/subscribe over one WebSocket:
//! the client sends `subscribe`/`unsubscribe`/`publish` control frames and
//! receives `message` delivery frames. This module tracks the subscribed
//! pattern set, re-issues every pattern after a reconnect, and
//! demultiplexes deliveries to per-pattern broadcast streams by wildcard
//! match (see [`crate::topic`]).
//!
//! Topic namespace:
//! `site/{siteId}/coord/{coordId}/telemetry`,
//! `site/{siteId}/coord/{coordId}/mmwave`,
//! `site/{siteId}/node/{nodeId}/telemetry`,
//! `site/{siteId}/node/{nodeId}/pairing`,
//! `site/{siteId}/zone/{zoneId}/presence`,
//! `site/{siteId}/node/{nodeId}/cmd`,
//! `site/{siteId}/zone/{zoneId}/cmd`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::direct::{WsRead, WsSink};
use crate::error::Error;
use crate::models::{BridgeFrame, BridgeMessage, ChannelError};
use crate::reconnect::{ChannelState, ReconnectConfig, reconnect_delay};
use crate::topic::topic_matches;

// ── Channel capacities ───────────────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;
const TOPIC_CHANNEL_CAPACITY: usize = 256;

// ── Control frames (client → server) ─────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlFrame<'a> {
    Subscribe { topic: &'a str },
    Unsubscribe { topic: &'a str },
    Publish { topic: &'a str, payload: &'a Value, qos: u8 },
}

// ── BridgeChannel ────────────────────────────────────────────────────

/// Handle to the bridge WebSocket channel.
///
/// Cheaply cloneable; all clones share one socket and one subscription set.
#[derive(Clone)]
pub struct BridgeChannel {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    url: Url,
    reconnect: ReconnectConfig,
    state: watch::Sender<ChannelState>,

    /// Global catch-all: every delivery frame, regardless of pattern.
    messages_tx: broadcast::Sender<Arc<BridgeMessage>>,
    errors_tx: broadcast::Sender<Arc<ChannelError>>,

    /// Tracked subscription patterns and their per-pattern streams.
    /// Keyed by pattern string, so re-subscribing is idempotent.
    topics: StdMutex<HashMap<String, broadcast::Sender<Arc<Value>>>>,

    sink: Mutex<Option<WsSink>>,
    cancel: StdMutex<Option<CancellationToken>>,
}

impl BridgeChannel {
    /// Create a channel handle. Does NOT connect -- call
    /// [`connect()`](Self::connect) to spawn the supervised run loop.
    pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::default());
        let (messages_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (errors_tx, _) = broadcast::channel(TOPIC_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(BridgeInner {
                url,
                reconnect,
                state,
                messages_tx,
                errors_tx,
                topics: StdMutex::new(HashMap::new()),
                sink: Mutex::new(None),
                cancel: StdMutex::new(None),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the channel and start the reconnection loop.
    ///
    /// No-op while a run loop is already live. Must be called from within
    /// a tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.inner.cancel.lock().expect("cancel slot poisoned");
        if slot.as_ref().is_some_and(|token| !token.is_cancelled()) {
            tracing::warn!("bridge channel already connected or connecting");
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
    /// Clears the entire tracked subscription set (patterns are not
    /// individually unsubscribed on teardown).
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

        self.inner.topics.lock().expect("topics poisoned").clear();
        self.inner.state.send_modify(|s| *s = ChannelState::default());
        tracing::debug!("bridge channel disconnected");
    }

    // ── Pub/sub ──────────────────────────────────────────────────────

    /// Subscribe to a topic pattern (idempotent per pattern).
    ///
    /// The returned receiver yields the payload of every delivery frame
    /// whose topic matches the pattern. If the channel is open the
    /// `subscribe` control frame is sent immediately; otherwise the
    /// pattern waits in the tracked set and is issued at the next open.
    pub async fn subscribe(&self, pattern: &str) -> broadcast::Receiver<Arc<Value>> {
        let tx = {
            let mut topics = self.inner.topics.lock().expect("topics poisoned");
            topics
                .entry(pattern.to_owned())
                .or_insert_with(|| broadcast::channel(TOPIC_CHANNEL_CAPACITY).0)
                .clone()
        };

        match self
            .inner
            .send_control(&ControlFrame::Subscribe { topic: pattern })
            .await
        {
            Ok(()) => tracing::debug!(pattern, "subscribed"),
            Err(Error::NotConnected) => {
                tracing::debug!(pattern, "subscribe deferred until next connect");
            }
            Err(e) => tracing::warn!(error = %e, pattern, "subscribe control frame failed"),
        }

        tx.subscribe()
    }

    /// Remove a pattern from the tracked set and complete its stream.
    ///
    /// Sends an `unsubscribe` control frame when the channel is open.
    pub async fn unsubscribe(&self, pattern: &str) {
        let removed = self
            .inner
            .topics
            .lock()
            .expect("topics poisoned")
            .remove(pattern);
        if removed.is_none() {
            return;
        }

        match self
            .inner
            .send_control(&ControlFrame::Unsubscribe { topic: pattern })
            .await
        {
            Ok(()) | Err(Error::NotConnected) => tracing::debug!(pattern, "unsubscribed"),
            Err(e) => tracing::warn!(error = %e, pattern, "unsubscribe control frame failed"),
        }
        // Dropping the sender completes outstanding receivers.
    }

    /// Publish a payload to a topic.
    ///
    /// Fails with [`Error::NotConnected`] when the channel is closed --
    /// publishes are never queued.
    pub async fn publish(&self, topic: &str, payload: &Value, qos: u8) -> Result<(), Error> {
        self.inner
            .send_control(&ControlFrame::Publish { topic, payload, qos })
            .await
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// `true` while the underlying socket is open.
    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().connected
    }

    /// Global catch-all message stream (every delivery frame).
    pub fn messages(&self) -> broadcast::Receiver<Arc<BridgeMessage>> {
        self.inner.messages_tx.subscribe()
    }

    /// Parse failures, for diagnostics only.
    pub fn errors(&self) -> broadcast::Receiver<Arc<ChannelError>> {
        self.inner.errors_tx.subscribe()
    }

    /// Currently tracked subscription patterns.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .topics
            .lock()
            .expect("topics poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl BridgeInner {
    /// Serialize and send a control frame over the open socket.
    async fn send_control(&self, frame: &ControlFrame<'_>) -> Result<(), Error> {
        let text = serde_json::to_string(frame)?;

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to send control frame");
                Error::WebSocketSend(e.to_string())
            })
    }

    /// Re-issue a `subscribe` control frame for every tracked pattern.
    ///
    /// Runs after every successful open. Order is unspecified; the broker
    /// treats duplicate subscriptions as idempotent.
    async fn resubscribe_all(&self) {
        let patterns: Vec<String> = {
            self.topics
                .lock()
                .expect("topics poisoned")
                .keys()
                .cloned()
                .collect()
        };
        if patterns.is_empty() {
            return;
        }

        for pattern in &patterns {
            if let Err(e) = self
                .send_control(&ControlFrame::Subscribe { topic: pattern })
                .await
            {
                tracing::warn!(error = %e, pattern, "resubscribe failed");
            }
        }

        tracing::info!(count = patterns.len(), "resubscribed to tracked patterns");
    }
}

// ── Background reconnection loop ─────────────────────────────────────

async fn run_loop(inner: &BridgeInner, cancel: &CancellationToken) {
    loop {
        inner.state.send_modify(|s| s.connecting = true);
        tracing::info!(url = %inner.url, "connecting bridge channel");

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
                tracing::info!("bridge channel connected");

                inner.resubscribe_all().await;

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
                tracing::warn!(error = %e, "bridge channel connect failed");
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

/// Wait out the reconnect delay. Returns `false` when the loop must stop.
async fn schedule_retry(inner: &BridgeInner, cancel: &CancellationToken) -> bool {
    let attempts = inner.state.borrow().reconnect_attempts;
    if attempts >= inner.reconnect.max_attempts {
        tracing::error!(
            max_attempts = inner.reconnect.max_attempts,
            "max reconnection attempts reached"
        );
        inner.state.send_modify(|s| {
            s.last_error = Some("max reconnection attempts reached".into());
        });
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

async fn read_frames(inner: &BridgeInner, mut read: WsRead, cancel: &CancellationToken) -> ReadOutcome {
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
                        tracing::trace!("bridge channel ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "bridge channel closed by server");
                        } else {
                            tracing::info!("bridge channel closed by server");
                        }
                        return ReadOutcome::Closed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "bridge channel read error");
                        inner.state.send_modify(|s| s.last_error = Some(e.to_string()));
                        return ReadOutcome::Closed;
                    }
                    None => {
                        tracing::info!("bridge channel stream ended");
                        return ReadOutcome::Closed;
                    }
                    _ => {}
                }
            }
        }
    }
}

// ── Delivery demultiplexing ──────────────────────────────────────────

/// Parse a delivery frame and fan it out: global stream first, then every
/// tracked pattern that matches the topic.
fn dispatch_text(inner: &BridgeInner, text: &str) {
    let frame: BridgeFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse bridge frame");
            let _ = inner.errors_tx.send(Arc::new(ChannelError {
                message: format!("failed to parse message: {e}"),
                raw: Some(text.to_owned()),
            }));
            return;
        }
    };

    if frame.kind != "message" {
        tracing::trace!(kind = %frame.kind, "ignoring non-delivery frame");
        return;
    }
    let (Some(topic), Some(payload)) = (frame.topic, frame.payload) else {
        tracing::debug!("delivery frame missing topic or payload");
        return;
    };

    let timestamp = frame
        .timestamp
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let payload = Arc::new(payload);
    let message = BridgeMessage {
        topic,
        payload: (*payload).clone(),
        timestamp,
    };
    let topic = message.topic.clone();
    let _ = inner.messages_tx.send(Arc::new(message));

    let topics = inner.topics.lock().expect("topics poisoned");
    for (pattern, tx) in topics.iter() {
        if topic_matches(pattern, &topic) {
            let _ = tx.send(Arc::clone(&payload));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
