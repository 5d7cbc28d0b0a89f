//! Process-wide push-channel connection manager.
//!
//! [`RealtimeChannel`] owns at most one physical WebSocket connection. It
//! is constructed once by the application root, shared as
//! `Arc<RealtimeChannel>`, and only that owner calls
//! [`disconnect`](RealtimeChannel::disconnect).
//!
//! [`connect`](RealtimeChannel::connect) spawns a connection task
//! (connect -> process frames -> bounded reconnect). Connection state is
//! published on a [`tokio::sync::watch`] channel; call
//! [`RealtimeChannel::subscribe_state`] to observe it.
//!
//! Room membership belongs to a physical connection. After a reconnect
//! the channel does not re-join rooms on its own; consumers re-issue
//! [`join_room`](RealtimeChannel::join_room) from their `on_connect`
//! listener if they still need room-scoped delivery.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use auditwatch_core::connection::ConnectionState;
use auditwatch_core::job_events::{EVENT_JOIN_AUDIT, EVENT_LEAVE_AUDIT};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelClient, ChannelConnection, ChannelStream};
use crate::listeners::ChannelListeners;
use crate::messages::{encode_message, parse_message};
use crate::reconnect::{reconnect_loop, ReconnectConfig, ReconnectFailure};

/// How long `disconnect` waits for the connection task to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a closing session waits for the Close frame to be written.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Message passed to `on_error` once reconnect attempts run out.
pub const RECONNECT_EXHAUSTED: &str = "Push channel reconnect attempts exhausted";

pub struct RealtimeChannel {
    shared: Arc<ChannelShared>,
}

struct ChannelShared {
    client: ChannelClient,
    reconnect: ReconnectConfig,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Incremented on every `connect`; tasks from older epochs are inert.
    epoch: u64,
    /// Present from `connect` until `disconnect` or reconnect exhaustion.
    lifecycle: Option<Lifecycle>,
    /// Present while a physical connection is live.
    link: Option<Link>,
}

struct Lifecycle {
    epoch: u64,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct Link {
    connection_id: String,
    outbound: mpsc::UnboundedSender<Message>,
    rooms: BTreeSet<String>,
}

/// Why a session stopped reading frames.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Dropped,
}

impl RealtimeChannel {
    /// Channel for `ws_url` with the default reconnect policy.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self::with_config(ChannelClient::new(ws_url), ReconnectConfig::default())
    }

    pub fn with_config(client: ChannelClient, reconnect: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(ChannelShared {
                client,
                reconnect,
                state_tx,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Open the connection and register `listeners`.
    ///
    /// A no-op (logged) while a connection is live or being established.
    /// Requires a tokio runtime.
    pub fn connect(&self, listeners: ChannelListeners) {
        let mut inner = self.shared.lock();
        if inner.lifecycle.is_some() {
            tracing::info!(
                connection_id = inner.link.as_ref().map(|l| l.connection_id.as_str()),
                "Push channel already connected, ignoring connect",
            );
            return;
        }

        inner.epoch += 1;
        let epoch = inner.epoch;
        let cancel = CancellationToken::new();
        self.shared.set_state(ConnectionState::Connecting);

        tracing::info!(epoch, url = %self.shared.client.ws_url(), "Connecting push channel");
        let task = tokio::spawn(run_connection_loop(
            Arc::clone(&self.shared),
            epoch,
            listeners,
            cancel.clone(),
        ));

        inner.lifecycle = Some(Lifecycle {
            epoch,
            cancel,
            task,
        });
    }

    /// Close the connection and release every registered listener.
    ///
    /// Waits up to 5 seconds for the connection task to exit, then aborts
    /// it.
    pub async fn disconnect(&self) {
        let lifecycle = {
            let mut inner = self.shared.lock();
            inner.link = None;
            self.shared.set_state(ConnectionState::Disconnected);
            inner.lifecycle.take()
        };

        let Some(lifecycle) = lifecycle else {
            tracing::debug!("Push channel disconnect with no active connection");
            return;
        };

        lifecycle.cancel.cancel();
        let abort = lifecycle.task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, lifecycle.task).await.is_err() {
            tracing::warn!(epoch = lifecycle.epoch, "Connection task did not exit, aborting");
            abort.abort();
        }

        tracing::info!(epoch = lifecycle.epoch, "Push channel disconnected");
    }

    /// Send a `{event, data}` frame. Returns `false` (and logs) when no
    /// connection is live.
    pub fn emit(&self, event: &str, payload: serde_json::Value) -> bool {
        let inner = self.shared.lock();
        match inner.link.as_ref() {
            Some(link) => link.send(event, &payload),
            None => {
                tracing::warn!(event, "Push channel not connected, dropping message");
                false
            }
        }
    }

    /// Subscribe the current connection to an audit's room.
    pub fn join_room(&self, room_id: &str) -> bool {
        let mut inner = self.shared.lock();
        let Some(link) = inner.link.as_mut() else {
            tracing::warn!(room_id, "Push channel not connected, cannot join room");
            return false;
        };
        let sent = link.send(EVENT_JOIN_AUDIT, &serde_json::json!({ "audit_id": room_id }));
        if sent {
            link.rooms.insert(room_id.to_string());
            tracing::debug!(room_id, "Joined audit room");
        }
        sent
    }

    pub fn leave_room(&self, room_id: &str) -> bool {
        let mut inner = self.shared.lock();
        let Some(link) = inner.link.as_mut() else {
            tracing::warn!(room_id, "Push channel not connected, cannot leave room");
            return false;
        };
        link.rooms.remove(room_id);
        link.send(EVENT_LEAVE_AUDIT, &serde_json::json!({ "audit_id": room_id }))
    }

    /// Rooms joined on the current physical connection.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.shared
            .lock()
            .link
            .as_ref()
            .map(|l| l.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Id of the live physical connection, if any.
    pub fn connection_id(&self) -> Option<String> {
        self.shared.lock().link.as_ref().map(|l| l.connection_id.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.shared.lock().lifecycle.take() {
            lifecycle.cancel.cancel();
        }
    }
}

impl Link {
    fn send(&self, event: &str, payload: &serde_json::Value) -> bool {
        let text = encode_message(event, payload);
        self.outbound.send(Message::Text(text)).is_ok()
    }
}

impl ChannelShared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Push channel state changed");
        }
    }

    fn is_current(inner: &Inner, epoch: u64) -> bool {
        inner.lifecycle.as_ref().map(|l| l.epoch) == Some(epoch)
    }

    /// Record a freshly established connection. Returns `false` when the
    /// epoch has been superseded by `disconnect`/`connect`.
    fn install_link(&self, epoch: u64, connection_id: &str, outbound: mpsc::UnboundedSender<Message>) -> bool {
        let mut inner = self.lock();
        if !Self::is_current(&inner, epoch) {
            return false;
        }
        inner.link = Some(Link {
            connection_id: connection_id.to_string(),
            outbound,
            rooms: BTreeSet::new(),
        });
        self.set_state(ConnectionState::Connected);
        true
    }

    fn mark_if_current(&self, epoch: u64, state: ConnectionState) {
        let mut inner = self.lock();
        if Self::is_current(&inner, epoch) {
            inner.link = None;
            self.set_state(state);
        }
    }

    /// Reconnect attempts ran out: drop the lifecycle so a later `connect`
    /// starts over.
    fn give_up(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if !Self::is_current(&inner, epoch) {
            return false;
        }
        inner.lifecycle = None;
        inner.link = None;
        self.set_state(ConnectionState::Disconnected);
        true
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Connect -> process frames -> reconnect, until cancelled or out of
/// attempts.
async fn run_connection_loop(
    shared: Arc<ChannelShared>,
    epoch: u64,
    listeners: ChannelListeners,
    cancel: CancellationToken,
) {
    let mut pending: Option<ChannelConnection> = None;

    loop {
        let conn = match pending.take() {
            Some(conn) => conn,
            None => {
                let first = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = shared.client.connect() => result,
                };
                match first {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Connection failed, entering reconnect loop");
                        match reconnect_loop(&shared.client, &shared.reconnect, &cancel).await {
                            Ok(conn) => conn,
                            Err(failure) => return exhausted(&shared, epoch, &listeners, failure),
                        }
                    }
                }
            }
        };

        let connection_id = conn.connection_id.clone();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        if !shared.install_link(epoch, &connection_id, outbound_tx) {
            return;
        }
        listeners.connected(&connection_id);

        let end = run_session(conn.ws_stream, outbound_rx, &listeners, &cancel).await;
        if end == SessionEnd::Cancelled || cancel.is_cancelled() {
            return;
        }

        tracing::info!(connection_id = %connection_id, "Connection lost, entering reconnect loop");
        shared.mark_if_current(epoch, ConnectionState::Disconnected);
        listeners.disconnected();
        shared.mark_if_current(epoch, ConnectionState::Connecting);

        match reconnect_loop(&shared.client, &shared.reconnect, &cancel).await {
            Ok(conn) => pending = Some(conn),
            Err(failure) => return exhausted(&shared, epoch, &listeners, failure),
        }
    }
}

fn exhausted(
    shared: &ChannelShared,
    epoch: u64,
    listeners: &ChannelListeners,
    failure: ReconnectFailure,
) {
    if failure == ReconnectFailure::Cancelled {
        return;
    }
    if shared.give_up(epoch) {
        tracing::warn!(
            max_attempts = shared.reconnect.max_attempts,
            "Giving up on push channel, polling continues",
        );
        listeners.error(RECONNECT_EXHAUSTED);
    }
}

/// Pump frames for one physical connection.
async fn run_session(
    ws_stream: ChannelStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    listeners: &ChannelListeners,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
                return SessionEnd::Cancelled;
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = sink.send(msg).await {
                    tracing::error!(error = %e, "Failed to send on push channel");
                    return SessionEnd::Dropped;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text_message(&text, listeners),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Push channel closed by server");
                    return SessionEnd::Dropped;
                }
                Some(Ok(_)) => {
                    // Binary / Frame: ignore.
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Push channel receive error");
                    return SessionEnd::Dropped;
                }
                None => {
                    tracing::info!("Push channel stream exhausted");
                    return SessionEnd::Dropped;
                }
            }
        }
    }
}

fn handle_text_message(text: &str, listeners: &ChannelListeners) {
    match parse_message(text) {
        Ok(event) => listeners.dispatch(&event),
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse push message");
        }
    }
}
