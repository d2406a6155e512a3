//! Bridge session: relay connection lifecycle and the connected-phase loops.
//!
//! While connected, three loops share the one relay connection: a poll
//! loop diffing local snapshots on a fixed interval, an event loop
//! reconciling immediately on local push notifications, and a receive
//! loop applying whatever the room sends back. They run under a single
//! `select!`: the first one to finish (clean end of stream included)
//! cancels the other two and sends the session back through reconnect.
//! Waiting for all of them would hang forever on a silent remote
//! disconnect, since the poll and event loops never finish on their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use parlor_sync::{compute, windows_from_state, Delta, WindowMap};

use crate::apply::apply_to_port;
use crate::chat;
use crate::ipc::{ControlPort, IpcClient};
use crate::protocol::RelayMessage;

/// Interval between state polls when no events arrive.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Fixed delay before a reconnect attempt. No retry ceiling; the bridge
/// is a long-lived sidecar and outlives relay outages.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Backoff before resubscribing a lost local event stream.
const EVENT_RETRY_DELAY: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Send half of the relay connection. Emptied when a send fails, so
/// later pushes no-op until the receive loop notices the loss and the
/// session reconnects.
type SharedSink = Arc<Mutex<Option<WsSink>>>;

/// Connection lifecycle of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

/// Why the connected phase ended.
#[derive(Debug)]
enum Disconnect {
    Clean,
    Error(String),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Clean => write!(f, "clean end of stream"),
            Disconnect::Error(e) => write!(f, "{e}"),
        }
    }
}

/// State shared by the poll and receive loops, guarded by one lock.
/// A remote reconciliation holds the lock from first command to rebase,
/// which serializes it against the poll loop's read-modify-write.
#[derive(Default)]
struct Shared {
    /// Last confirmed local window map. Only ever set from a freshly
    /// read local snapshot — remote ids are not local identities.
    baseline: WindowMap,
    /// Highest chat seq already forwarded to the room.
    last_chat_seq: i64,
}

/// One bridge instance: owns the relay URL, the control-socket client,
/// and the shared reconciliation state.
pub struct BridgeSession {
    instance_id: String,
    ws_url: String,
    poll_interval: Duration,
    ipc: Arc<IpcClient>,
    shared: Mutex<Shared>,
    state: std::sync::Mutex<SessionState>,
}

impl BridgeSession {
    pub fn new(
        instance_id: impl Into<String>,
        ws_url: impl Into<String>,
        ipc: IpcClient,
        poll_interval: Duration,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            ws_url: ws_url.into(),
            poll_interval,
            ipc: Arc::new(ipc),
            shared: Mutex::new(Shared::default()),
            state: std::sync::Mutex::new(SessionState::Disconnected),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().expect("state lock poisoned") = next;
    }

    /// Mark the session as terminally shutting down. The caller is
    /// expected to drop `run` right after.
    pub fn shutdown(&self) {
        self.set_state(SessionState::ShuttingDown);
    }

    /// Connect-and-reconnect forever. Never returns; the caller decides
    /// when to stop driving it.
    pub async fn run(&self) {
        loop {
            self.set_state(SessionState::Connecting);
            tracing::info!(url = %self.ws_url, instance = %self.instance_id, "Connecting to relay");

            match connect_async(&self.ws_url).await {
                Ok((ws, _)) => {
                    self.set_state(SessionState::Connected);
                    tracing::info!("Connected to relay");
                    let end = self.connected(ws).await;
                    tracing::warn!(reason = %end, "Relay connection lost");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Relay connect failed");
                }
            }

            self.set_state(SessionState::Disconnected);
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// The connected phase. First loop to finish wins the select and the
    /// other two futures are dropped with it; no loop outlives the
    /// connection.
    async fn connected(&self, ws: WsStream) -> Disconnect {
        let (sink, stream) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(Some(sink)));

        tokio::select! {
            end = self.poll_loop(&sink) => end,
            end = self.event_loop(&sink) => end,
            end = self.receive_loop(stream, &sink) => end,
        }
    }

    /// Fixed-interval reconciliation heartbeat.
    async fn poll_loop(&self, sink: &SharedSink) -> Disconnect {
        loop {
            reconcile_local(self.ipc.as_ref(), &self.shared, sink, &self.instance_id).await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Near-real-time propagation between heartbeats: a second local
    /// connection subscribed to push events, reconciling on each one.
    /// Purely local; losing it never signals relay connection loss, so
    /// this loop retries forever instead of returning.
    async fn event_loop(&self, sink: &SharedSink) -> Disconnect {
        loop {
            match self.ipc.subscribe_events().await {
                Ok(mut events) => {
                    tracing::debug!("Subscribed to local push events");
                    loop {
                        match events.next_event().await {
                            Ok(event) => {
                                if matches!(event.as_str(), "state_changed" | "window_closed") {
                                    tracing::debug!(event = %event, "Local event, reconciling");
                                    reconcile_local(
                                        self.ipc.as_ref(),
                                        &self.shared,
                                        sink,
                                        &self.instance_id,
                                    )
                                    .await;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Event stream lost, resubscribing");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Event subscribe failed");
                }
            }
            tokio::time::sleep(EVENT_RETRY_DELAY).await;
        }
    }

    /// Inbound relay dispatch. Returns on clean end of stream exactly
    /// like on error: either way the connection is gone.
    async fn receive_loop(&self, mut stream: SplitStream<WsStream>, sink: &SharedSink) -> Disconnect {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => self.dispatch(&text).await,
                Ok(Message::Ping(data)) => {
                    let mut guard = sink.lock().await;
                    if let Some(ws) = guard.as_mut() {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                }
                Ok(Message::Close(_)) => return Disconnect::Clean,
                Ok(_) => {}
                Err(e) => return Disconnect::Error(format!("ws error: {e}")),
            }
        }
        Disconnect::Clean
    }

    async fn dispatch(&self, text: &str) {
        let msg: RelayMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable relay frame");
                return;
            }
        };

        match msg {
            RelayMessage::StateSync { state } => {
                apply_remote_sync(self.ipc.as_ref(), &self.shared, &state.windows).await;
            }
            RelayMessage::StateDelta { delta } => {
                if !delta.is_empty() {
                    apply_remote_delta(self.ipc.as_ref(), &self.shared, &delta).await;
                }
            }
            RelayMessage::ChatMsg { sender, text, instance } => {
                handle_remote_chat(
                    self.ipc.as_ref(),
                    &self.instance_id,
                    &sender,
                    &text,
                    instance.as_deref(),
                )
                .await;
            }
        }
    }
}

/// Send one message to the room. On failure the cached sink is dropped;
/// loss detection stays with the receive loop.
async fn push(sink: &SharedSink, msg: &RelayMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode relay message");
            return false;
        }
    };
    let mut guard = sink.lock().await;
    let Some(ws) = guard.as_mut() else {
        return false;
    };
    match ws.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Relay send failed, dropping connection handle");
            *guard = None;
            false
        }
    }
}

/// One local reconciliation cycle: snapshot, diff against the baseline,
/// push the delta, rebase, then forward pending chat lines.
///
/// Any control-socket failure degrades this cycle to a no-op; the next
/// tick or event retries. The chat cursor advances past every scanned
/// entry whether or not its send succeeded: at-most-once, a stale seq is
/// never retried.
async fn reconcile_local(
    port: &dyn ControlPort,
    shared: &Mutex<Shared>,
    sink: &SharedSink,
    instance_id: &str,
) {
    let state = match port.get_state().await {
        Ok(state) => state,
        Err(e) => {
            tracing::debug!(error = %e, "Snapshot failed, skipping cycle");
            return;
        }
    };

    let new = windows_from_state(&state);
    let mut guard = shared.lock().await;

    if let Some(delta) = compute(&guard.baseline, &new) {
        tracing::info!(
            add = delta.add.len(),
            remove = delta.remove.len(),
            update = delta.update.len(),
            "Local state changed, pushing delta"
        );
        push(sink, &RelayMessage::StateDelta { delta }).await;
        guard.baseline = new;
    }

    for entry in chat::entries_after(&state, guard.last_chat_seq) {
        push(
            sink,
            &RelayMessage::ChatMsg {
                sender: entry.sender,
                text: entry.text,
                instance: Some(instance_id.to_string()),
            },
        )
        .await;
        guard.last_chat_seq = guard.last_chat_seq.max(entry.seq);
    }
}

/// Apply a remote incremental delta, then re-read the local state and
/// rebase the baseline onto what the instance actually did. The next
/// diff must run against the ids the instance assigned, not the remote
/// ones.
async fn apply_remote_delta(port: &dyn ControlPort, shared: &Mutex<Shared>, delta: &Delta) {
    let mut guard = shared.lock().await;
    let applied = apply_to_port(port, delta).await;
    tracing::info!(applied = applied.len(), "Applied remote delta");
    rebase_from_reread(port, &mut guard).await;
}

/// Apply a full remote map: diff it against the baseline, apply the
/// difference, then re-read and rebase exactly like the delta path.
async fn apply_remote_sync(port: &dyn ControlPort, shared: &Mutex<Shared>, windows: &serde_json::Value) {
    let remote = windows_from_state(&serde_json::json!({ "windows": windows }));
    if remote.is_empty() {
        return;
    }

    let mut guard = shared.lock().await;
    let Some(delta) = compute(&guard.baseline, &remote) else {
        return;
    };
    let applied = apply_to_port(port, &delta).await;
    tracing::info!(applied = applied.len(), "Applied state sync");
    rebase_from_reread(port, &mut guard).await;
}

async fn rebase_from_reread(port: &dyn ControlPort, guard: &mut Shared) {
    match port.get_state().await {
        Ok(state) => guard.baseline = windows_from_state(&state),
        Err(e) => {
            tracing::debug!(error = %e, "Post-apply re-read failed, baseline unchanged");
        }
    }
}

/// Deliver an inbound chat line unless it is our own echo or empty.
async fn handle_remote_chat(
    port: &dyn ControlPort,
    instance_id: &str,
    sender: &str,
    text: &str,
    origin: Option<&str>,
) {
    if !chat::accepts_remote(instance_id, origin, text) {
        return;
    }
    if chat::deliver(port, sender, text).await {
        tracing::debug!(sender = %sender, "Chat line delivered");
    } else {
        tracing::warn!(sender = %sender, "Chat delivery failed");
    }
}
