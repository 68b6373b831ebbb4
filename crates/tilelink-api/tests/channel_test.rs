// Integration tests for the WebSocket channels against an in-process
// tokio-tungstenite server: connect/disconnect lifecycle, reconnection
// with resubscription, and typed routing end to end.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use tilelink_api::bridge::BridgeChannel;
use tilelink_api::direct::DirectChannel;
use tilelink_api::reconnect::ReconnectConfig;

const WAIT: Duration = Duration::from_secs(5);

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        base_delay: Duration::from_millis(50),
        max_attempts: 10,
    }
}

async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let url = Url::parse(&format!("ws://{addr}")).expect("url");
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    tokio_tungstenite::accept_async(stream).await.expect("handshake")
}

// ── Bridge channel ──────────────────────────────────────────────────

/// The full §resubscribe scenario: open → subscribe → unexpected drop →
/// automatic reconnect → exactly one resubscription → delivery reaches
/// the per-pattern stream.
#[tokio::test]
async fn bridge_reconnects_and_resubscribes_after_drop() {
    let (listener, url) = bind().await;
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    let server = tokio::spawn(async move {
        // First connection: receive the subscribe frame, then drop the
        // socket without a close frame.
        let mut ws = accept(&listener).await;
        if let Some(Ok(msg)) = ws.next().await {
            let _ = frames_tx.send(msg.to_text().expect("text").to_owned());
        }
        drop(ws);

        // Second connection: the client must resubscribe on its own.
        let mut ws = accept(&listener).await;
        if let Some(Ok(msg)) = ws.next().await {
            let _ = frames_tx.send(msg.to_text().expect("text").to_owned());
        }

        let delivery = json!({
            "type": "message",
            "topic": "site/site001/node/n7/telemetry",
            "payload": { "node_id": "n7", "temperature": 20.0 },
            "timestamp": 1_765_000_000_000_i64
        });
        ws.send(Message::Text(delivery.to_string().into()))
            .await
            .expect("deliver");

        // Hold the connection open until the client is done.
        while ws.next().await.is_some() {}
    });

    let channel = BridgeChannel::new(url, fast_reconnect());
    channel.connect();

    let mut state = channel.state();
    timeout(WAIT, state.wait_for(|s| s.connected))
        .await
        .expect("connect timeout")
        .expect("state sender alive");

    let mut telemetry = channel.subscribe("site/site001/node/+/telemetry").await;

    // First subscribe frame, sent on the live socket.
    let first = timeout(WAIT, frames_rx.recv()).await.expect("frame").expect("open");
    assert!(first.contains("\"subscribe\""));
    assert!(first.contains("site/site001/node/+/telemetry"));

    // The server drops the socket; the channel must notice and retry.
    let dropped_at = Instant::now();
    let second = timeout(WAIT, frames_rx.recv()).await.expect("frame").expect("open");
    assert!(second.contains("\"subscribe\""));
    assert!(second.contains("site/site001/node/+/telemetry"));
    assert!(
        dropped_at.elapsed() < Duration::from_secs(2),
        "reconnect took too long"
    );

    // Exactly one resubscription: no third subscribe frame in flight.
    assert!(frames_rx.try_recv().is_err());

    // The delivery after reconnect reaches the original stream.
    let payload = timeout(WAIT, telemetry.recv())
        .await
        .expect("delivery timeout")
        .expect("stream alive");
    assert_eq!(payload["node_id"], "n7");

    // Counter was reset by the successful reopen.
    assert_eq!(channel.state().borrow().reconnect_attempts, 0);

    channel.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn bridge_connect_twice_opens_one_socket() {
    let (listener, url) = bind().await;
    let (count_tx, mut count_rx) = mpsc::unbounded_channel::<()>();

    let server = tokio::spawn(async move {
        loop {
            let mut ws = accept(&listener).await;
            let _ = count_tx.send(());
            tokio::spawn(async move { while ws.next().await.is_some() {} });
        }
    });

    let channel = BridgeChannel::new(url, fast_reconnect());
    channel.connect();
    channel.connect(); // no-op while connecting/connected

    let mut state = channel.state();
    timeout(WAIT, state.wait_for(|s| s.connected))
        .await
        .expect("connect timeout")
        .expect("state sender alive");
    channel.connect(); // still a no-op

    timeout(WAIT, count_rx.recv()).await.expect("first socket");
    // Give a second erroneous connection a chance to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(count_rx.try_recv().is_err(), "second socket was opened");

    channel.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn bridge_publish_reaches_the_wire() {
    let (listener, url) = bind().await;
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_text() {
                let _ = frames_tx.send(msg.to_text().expect("text").to_owned());
            }
        }
    });

    let channel = BridgeChannel::new(url, fast_reconnect());
    channel.connect();
    let mut state = channel.state();
    timeout(WAIT, state.wait_for(|s| s.connected))
        .await
        .expect("connect timeout")
        .expect("state sender alive");

    channel
        .publish(
            "site/site001/node/n1/cmd",
            &json!({ "cmd": "set_light", "r": 0, "g": 0, "b": 0, "w": 255, "fade_ms": 200 }),
            1,
        )
        .await
        .expect("publish");

    let frame = timeout(WAIT, frames_rx.recv()).await.expect("frame").expect("open");
    let parsed: serde_json::Value = serde_json::from_str(&frame).expect("json");
    assert_eq!(parsed["type"], "publish");
    assert_eq!(parsed["topic"], "site/site001/node/n1/cmd");
    assert_eq!(parsed["qos"], 1);
    assert_eq!(parsed["payload"]["w"], 255);

    channel.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn bridge_gives_up_after_max_attempts() {
    // Bind then immediately drop the listener so every connect is refused.
    let (listener, url) = bind().await;
    drop(listener);

    let channel = BridgeChannel::new(
        url,
        ReconnectConfig {
            base_delay: Duration::from_millis(10),
            max_attempts: 2,
        },
    );
    channel.connect();

    let mut state = channel.state();
    let exhausted = timeout(
        WAIT,
        state.wait_for(|s| {
            s.last_error.as_deref() == Some("max reconnection attempts reached")
        }),
    )
    .await
    .expect("exhaustion timeout")
    .expect("state sender alive");

    assert!(!exhausted.connected);
    assert!(!exhausted.connecting);
    assert_eq!(exhausted.reconnect_attempts, 2);
}

// ── Direct channel ──────────────────────────────────────────────────

#[tokio::test]
async fn direct_routes_envelopes_and_survives_server_close() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // First connection: one telemetry envelope, then a clean close.
        let mut ws = accept(&listener).await;
        let telemetry = json!({
            "type": "telemetry",
            "payload": { "node_id": "n1", "temperature": 21.5 },
            "timestamp": "2026-03-01T10:00:00Z"
        });
        ws.send(Message::Text(telemetry.to_string().into()))
            .await
            .expect("send");
        ws.close(None).await.expect("close");

        // Second connection after the client reconnects.
        let mut ws = accept(&listener).await;
        let status = json!({
            "type": "status",
            "payload": { "entity_id": "n1", "entity_type": "node", "status": "offline" }
        });
        ws.send(Message::Text(status.to_string().into()))
            .await
            .expect("send");
        while ws.next().await.is_some() {}
    });

    let channel = DirectChannel::new(url, fast_reconnect());
    let mut telemetry = channel.telemetry();
    let mut status = channel.status();
    channel.connect();

    let payload = timeout(WAIT, telemetry.recv())
        .await
        .expect("telemetry timeout")
        .expect("stream alive");
    assert_eq!(payload["node_id"], "n1");

    let payload = timeout(WAIT, status.recv())
        .await
        .expect("status timeout")
        .expect("stream alive");
    assert_eq!(payload["status"], "offline");

    channel.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn direct_send_reaches_the_wire() {
    let (listener, url) = bind().await;
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_text() {
                let _ = frames_tx.send(msg.to_text().expect("text").to_owned());
            }
        }
    });

    let channel = DirectChannel::new(url, fast_reconnect());
    channel.connect();
    let mut state = channel.state();
    timeout(WAIT, state.wait_for(|s| s.connected))
        .await
        .expect("connect timeout")
        .expect("state sender alive");

    channel
        .send(&json!({ "type": "ping" }))
        .await
        .expect("send");

    let frame = timeout(WAIT, frames_rx.recv()).await.expect("frame").expect("open");
    assert_eq!(frame, r#"{"type":"ping"}"#);

    channel.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect_timer() {
    // No listener: the first connect fails and a retry timer is pending.
    let (listener, url) = bind().await;
    drop(listener);

    let channel = DirectChannel::new(
        url,
        ReconnectConfig {
            base_delay: Duration::from_secs(3600),
            max_attempts: 10,
        },
    );
    channel.connect();

    let mut state = channel.state();
    timeout(WAIT, state.wait_for(|s| s.reconnect_attempts == 1))
        .await
        .expect("first attempt timeout")
        .expect("state sender alive");

    // Must return promptly even though a one-hour timer is pending.
    timeout(Duration::from_secs(1), channel.disconnect())
        .await
        .expect("disconnect blocked on the retry timer");

    let state = channel.state().borrow().clone();
    assert!(!state.connected);
    assert!(!state.connecting);
    assert_eq!(state.reconnect_attempts, 0);
}
