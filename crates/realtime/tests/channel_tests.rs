//! Integration tests for `RealtimeChannel`.
//!
//! Each test runs a loopback WebSocket server on an ephemeral port. The
//! server counts accepted connections, forwards every text frame it
//! receives, and can push frames to (or close) its live connections on
//! command.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use auditwatch_core::connection::ConnectionState;
use auditwatch_realtime::{
    ChannelClient, ChannelListeners, RealtimeChannel, ReconnectConfig, RECONNECT_EXHAUSTED,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum ServerCommand {
    Push(String),
    CloseAll,
}

struct TestServer {
    url: String,
    accepted: Arc<AtomicUsize>,
    frames: mpsc::UnboundedReceiver<String>,
    commands: broadcast::Sender<ServerCommand>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(16);

        let accepted_count = Arc::clone(&accepted);
        let command_tx = commands.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                accepted_count.fetch_add(1, Ordering::SeqCst);
                let mut command_rx = command_tx.subscribe();
                let frames_tx = frames_tx.clone();

                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            cmd = command_rx.recv() => match cmd {
                                Ok(ServerCommand::Push(text)) => {
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(ServerCommand::CloseAll) | Err(_) => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = frames_tx.send(text);
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            }
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            accepted,
            frames,
            commands,
        }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn push(&self, text: &str) {
        self.commands.send(ServerCommand::Push(text.to_string())).unwrap();
    }

    fn close_all(&self) {
        self.commands.send(ServerCommand::CloseAll).unwrap();
    }

    async fn next_frame(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("server stopped");
        serde_json::from_str(&text).unwrap()
    }
}

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        delay: Duration::from_millis(20),
    }
}

fn channel_for(url: &str, max_attempts: u32) -> RealtimeChannel {
    RealtimeChannel::with_config(ChannelClient::new(url), fast_reconnect(max_attempts))
}

/// Listeners that report every established connection id on a channel.
fn connect_reporter() -> (ChannelListeners, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listeners = ChannelListeners::new().on_connect(move |id| {
        let _ = tx.send(id.to_string());
    });
    (listeners, rx)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

async fn wait_for_state(channel: &RealtimeChannel, state: ConnectionState) {
    let mut rx = channel.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

// ---------------------------------------------------------------------------
// Test: connect reaches Connected and reports the connection id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_reaches_connected() {
    let server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 1);
    let (listeners, mut ids) = connect_reporter();

    assert_eq!(channel.state(), ConnectionState::Disconnected);
    channel.connect(listeners);
    assert_eq!(channel.state(), ConnectionState::Connecting);

    let id = recv(&mut ids).await;
    assert!(channel.is_connected());
    assert_eq!(channel.connection_id().as_deref(), Some(id.as_str()));
    assert_eq!(server.accepted(), 1);

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: a second connect while connected opens no second connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_connect_is_ignored() {
    let server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 1);
    let (first, mut first_ids) = connect_reporter();
    let (second, mut second_ids) = connect_reporter();

    channel.connect(first);
    let id = recv(&mut first_ids).await;

    channel.connect(second);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.accepted(), 1);
    assert_eq!(channel.connection_id().as_deref(), Some(id.as_str()));
    assert!(second_ids.try_recv().is_err());

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: join/leave frames reach the server and track membership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn room_membership_frames_reach_server() {
    let mut server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 1);
    let (listeners, mut ids) = connect_reporter();
    channel.connect(listeners);
    recv(&mut ids).await;

    assert!(channel.join_room("audit-1"));
    let frame = server.next_frame().await;
    assert_eq!(frame["event"], "join_audit");
    assert_eq!(frame["data"]["audit_id"], "audit-1");
    assert_eq!(channel.joined_rooms(), vec!["audit-1".to_string()]);

    assert!(channel.leave_room("audit-1"));
    let frame = server.next_frame().await;
    assert_eq!(frame["event"], "leave_audit");
    assert_eq!(frame["data"]["audit_id"], "audit-1");
    assert!(channel.joined_rooms().is_empty());

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: named events and envelopes reach the same callback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn named_and_envelope_events_share_a_callback() {
    let server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 1);
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let (progress_tx, mut progress) = mpsc::unbounded_channel();
    let listeners = ChannelListeners::new()
        .on_connect(move |_| {
            let _ = connected_tx.send(());
        })
        .on_audit_progress(move |data| {
            let _ = progress_tx.send((data.audit_id.clone(), data.progress));
        });
    channel.connect(listeners);
    recv(&mut connected).await;

    server.push(r#"{"event":"audit_progress","data":{"audit_id":"a1","step":"Crawling","progress":30}}"#);
    server.push(r#"{"event":"notification","data":{"type":"audit_progress","data":{"step":"Scoring","progress":60},"timestamp":"2026-01-01T00:00:00Z","audit_id":"a1"}}"#);

    assert_eq!(recv(&mut progress).await, (Some("a1".to_string()), 30));
    assert_eq!(recv(&mut progress).await, (Some("a1".to_string()), 60));

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: malformed frames are skipped without dropping the connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 1);
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let (alert_tx, mut alerts) = mpsc::unbounded_channel();
    let listeners = ChannelListeners::new()
        .on_connect(move |_| {
            let _ = connected_tx.send(());
        })
        .on_system_alert(move |data| {
            let _ = alert_tx.send(data.message.clone());
        });
    channel.connect(listeners);
    recv(&mut connected).await;

    server.push("not json");
    server.push(r#"{"event":"something_else","data":{}}"#);
    server.push(r#"{"event":"system_alert","data":{"level":"info","message":"still here"}}"#);

    assert_eq!(recv(&mut alerts).await, "still here");
    assert!(channel.is_connected());
    assert_eq!(server.accepted(), 1);

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: disconnect releases listeners and clears connection state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_releases_listeners() {
    let server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 1);
    let marker = Arc::new(());
    let held = Arc::clone(&marker);
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let listeners = ChannelListeners::new()
        .on_connect(move |_| {
            let _ = connected_tx.send(());
        })
        .on_disconnect(move || {
            assert!(Arc::strong_count(&held) > 1);
        });

    channel.connect(listeners);
    recv(&mut connected).await;
    assert!(Arc::strong_count(&marker) > 1);

    channel.disconnect().await;

    assert_eq!(Arc::strong_count(&marker), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(channel.connection_id().is_none());
    assert!(!channel.emit("ping", serde_json::json!({})));
    assert_eq!(server.accepted(), 1);
}

// ---------------------------------------------------------------------------
// Test: a dropped connection reconnects with a fresh id and no rooms
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_drop_triggers_reconnect() {
    let server = TestServer::spawn().await;
    let channel = channel_for(&server.url, 5);
    let (connected_tx, mut ids) = mpsc::unbounded_channel();
    let (dropped_tx, mut dropped) = mpsc::unbounded_channel();
    let listeners = ChannelListeners::new()
        .on_connect(move |id| {
            let _ = connected_tx.send(id.to_string());
        })
        .on_disconnect(move || {
            let _ = dropped_tx.send(());
        });

    channel.connect(listeners);
    let first = recv(&mut ids).await;
    assert!(channel.join_room("audit-1"));

    server.close_all();
    recv(&mut dropped).await;
    let second = recv(&mut ids).await;

    assert_ne!(first, second);
    assert_eq!(channel.connection_id().as_deref(), Some(second.as_str()));
    assert!(channel.joined_rooms().is_empty());
    assert_eq!(server.accepted(), 2);

    channel.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: exhausting reconnect attempts surfaces an error and allows connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_endpoint_reports_error() {
    let channel = channel_for("ws://127.0.0.1:9", 2);
    let (error_tx, mut errors) = mpsc::unbounded_channel();
    let listeners = ChannelListeners::new().on_error(move |msg| {
        let _ = error_tx.send(msg.to_string());
    });

    channel.connect(listeners.clone());
    assert_eq!(recv(&mut errors).await, RECONNECT_EXHAUSTED);
    wait_for_state(&channel, ConnectionState::Disconnected).await;
    assert!(channel.connection_id().is_none());

    // The lifecycle was released, so a new connect is accepted.
    channel.connect(listeners);
    assert_eq!(channel.state(), ConnectionState::Connecting);

    channel.disconnect().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

// ---------------------------------------------------------------------------
// Test: emit and join while disconnected are dropped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn emit_while_disconnected_returns_false() {
    let channel = RealtimeChannel::new("ws://127.0.0.1:9");

    assert!(!channel.emit("join_audit", serde_json::json!({"audit_id": "a1"})));
    assert!(!channel.join_room("a1"));
    assert!(!channel.leave_room("a1"));
    assert!(channel.joined_rooms().is_empty());
}

// ---------------------------------------------------------------------------
// Test: disconnect before connect is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_without_connect_is_noop() {
    let channel = RealtimeChannel::new("ws://127.0.0.1:9");
    channel.disconnect().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}
