//! Room-scoped push channel.
//!
//! States: Disconnected → Connecting → Joined(room) → Closing → Disconnected.
//!
//! The socket itself sits behind `Connector`, which hands back a pair of
//! string queues. `WsConnector` bridges those queues to a WebSocket with one
//! write task and one read task. The channel runs a single pump task that
//! parses inbound text into `ServerFrame`s and forwards them, in arrival
//! order, to the frame sink supplied at construction.
//!
//! Frames sent while the socket is down are not replayed; a later history
//! reload is the only recovery. Reconnect is off unless the policy says so.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use cm_proto::{ClientFrame, RoomId, RoomMembership, ServerFrame};

use crate::config::SelfIdentity;
use crate::error::ChatError;

const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    /// Socket opening, or open but no room joined yet.
    Connecting,
    Joined(RoomId),
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// One-shot connection; a drop leaves the channel disconnected.
    Never,
    /// Exponential backoff: `initial`, doubled per attempt, capped at `max`.
    Backoff {
        initial: Duration,
        max: Duration,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    pub fn default_backoff() -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 8,
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff { initial, max, max_attempts } => {
                if attempt >= max_attempts {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Never
    }
}

// ── Socket seam ──────────────────────────────────────────────────────────────

/// An open socket as two text queues. Dropping `outbound` closes the socket;
/// `inbound` ends when the peer closes or the connection fails.
pub struct SocketPair {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<SocketPair, ChatError>;
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> Result<SocketPair, ChatError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_QUEUE);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    tracing::warn!(target: "cm_chat", error = %e, "push socket write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!(target: "cm_chat", "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(target: "cm_chat", error = %e, "push socket read failed");
                        break;
                    }
                };
                if in_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(SocketPair { outbound: out_tx, inbound: in_rx })
    }
}

// ── Channel ──────────────────────────────────────────────────────────────────

struct Shared {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    frames: mpsc::UnboundedSender<ServerFrame>,
    state: watch::Sender<ChannelState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// Membership to restore after a reconnect.
    joined: Mutex<Option<RoomMembership>>,
}

impl Shared {
    fn set_state(&self, next: ChannelState) {
        tracing::debug!(target: "cm_chat", state = ?next, "push channel state");
        self.state.send_replace(next);
    }

    fn is_closing(&self) -> bool {
        matches!(*self.state.borrow(), ChannelState::Closing)
    }

    async fn send(&self, frame: &ClientFrame) -> Result<(), ChatError> {
        let text = frame.to_text()?;
        let tx = self
            .outbound
            .lock()
            .clone()
            .ok_or_else(|| ChatError::Transport("push channel is not connected".into()))?;
        tx.send(text)
            .await
            .map_err(|_| ChatError::Transport("push socket closed".into()))
    }

    fn dispatch(&self, text: &str) {
        match ServerFrame::parse(text) {
            Ok(frame) => {
                if self.frames.send(frame).is_err() {
                    tracing::debug!(target: "cm_chat", "frame dropped: no consumer");
                }
            }
            Err(e) => {
                tracing::warn!(target: "cm_chat", error = %e, "ignoring malformed push frame");
            }
        }
    }
}

pub struct TransportChannel {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TransportChannel {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        frames: mpsc::UnboundedSender<ServerFrame>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                policy,
                frames,
                state,
                outbound: Mutex::new(None),
                joined: Mutex::new(None),
            }),
            pump: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Open the socket. A no-op while a pump is still running, including one
    /// waiting out a reconnect delay.
    pub async fn connect(&self) -> Result<(), ChatError> {
        {
            let mut pump = self.pump.lock();
            match pump.as_ref() {
                Some(handle) if !handle.is_finished() => return Ok(()),
                Some(_) => {
                    pump.take();
                }
                None => {}
            }
        }
        self.shared.set_state(ChannelState::Connecting);
        match self.shared.connector.open().await {
            Ok(pair) => {
                *self.shared.outbound.lock() = Some(pair.outbound);
                let handle = tokio::spawn(pump(self.shared.clone(), pair.inbound));
                *self.pump.lock() = Some(handle);
                tracing::info!(target: "cm_chat", event = "push_channel_connected");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ChannelState::Disconnected);
                Err(e)
            }
        }
    }

    /// Send `join_room`. Must follow a successful `connect`.
    pub async fn join(&self, room: &RoomId, me: &SelfIdentity) -> Result<(), ChatError> {
        let membership = membership(room, me);
        self.shared.send(&ClientFrame::JoinRoom(membership.clone())).await?;
        *self.shared.joined.lock() = Some(membership);
        self.shared.set_state(ChannelState::Joined(room.clone()));
        tracing::info!(target: "cm_chat", event = "room_joined", room_id = %room);
        Ok(())
    }

    /// Send `leave_room` for `room` and tear the socket down. The channel
    /// always ends up `Disconnected`; the returned error only reports the
    /// leave frame.
    pub async fn leave(&self, room: &RoomId, me: &SelfIdentity) -> Result<(), ChatError> {
        self.shared.set_state(ChannelState::Closing);
        self.teardown(Some(room.clone()), me).await
    }

    /// Tear the channel down from any state. A pending reconnect is
    /// cancelled; `leave_room` is sent only when a room is currently joined.
    pub async fn shutdown(&self, me: &SelfIdentity) -> Result<(), ChatError> {
        let previous = self.shared.state.send_replace(ChannelState::Closing);
        let joined = match previous {
            ChannelState::Joined(room) => Some(room),
            _ => None,
        };
        self.teardown(joined, me).await
    }

    async fn teardown(&self, leave: Option<RoomId>, me: &SelfIdentity) -> Result<(), ChatError> {
        // Stop the pump first so it cannot reconnect behind our back.
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        let result = match &leave {
            Some(room) => self.shared.send(&ClientFrame::LeaveRoom(membership(room, me))).await,
            None => Ok(()),
        };
        self.shared.joined.lock().take();
        self.shared.outbound.lock().take();
        self.shared.set_state(ChannelState::Disconnected);
        match &leave {
            Some(room) => tracing::info!(target: "cm_chat", event = "room_left", room_id = %room),
            None => tracing::debug!(target: "cm_chat", "push channel shut down"),
        }
        result
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

fn membership(room: &RoomId, me: &SelfIdentity) -> RoomMembership {
    RoomMembership {
        room_id: room.clone(),
        user_id: me.user_id,
        username: me.username.clone(),
    }
}

async fn pump(shared: Arc<Shared>, mut inbound: mpsc::Receiver<String>) {
    loop {
        while let Some(text) = inbound.recv().await {
            shared.dispatch(&text);
        }
        shared.outbound.lock().take();
        if shared.is_closing() {
            break;
        }
        shared.set_state(ChannelState::Disconnected);
        tracing::warn!(target: "cm_chat", event = "push_channel_dropped", "push channel dropped");
        match reconnect(&shared).await {
            Some(next) => inbound = next,
            None => break,
        }
    }
}

async fn reconnect(shared: &Shared) -> Option<mpsc::Receiver<String>> {
    let mut attempt = 0;
    while let Some(delay) = shared.policy.delay_for(attempt) {
        tokio::time::sleep(delay).await;
        attempt += 1;
        shared.set_state(ChannelState::Connecting);
        let pair = match shared.connector.open().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(target: "cm_chat", attempt, error = %e, "push reconnect failed");
                shared.set_state(ChannelState::Disconnected);
                continue;
            }
        };
        *shared.outbound.lock() = Some(pair.outbound);
        let rejoin = shared.joined.lock().clone();
        if let Some(membership) = rejoin {
            let room = membership.room_id.clone();
            if let Err(e) = shared.send(&ClientFrame::JoinRoom(membership)).await {
                tracing::warn!(target: "cm_chat", attempt, error = %e, "rejoin after reconnect failed");
                shared.outbound.lock().take();
                shared.set_state(ChannelState::Disconnected);
                continue;
            }
            shared.set_state(ChannelState::Joined(room));
        }
        tracing::info!(target: "cm_chat", event = "push_channel_reconnected", attempt);
        return Some(pair.inbound);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use cm_proto::UserId;

    /// Server side of an in-memory socket.
    struct Peer {
        from_client: mpsc::Receiver<String>,
        to_client: mpsc::Sender<String>,
    }

    #[derive(Default)]
    struct MemoryConnector {
        sessions: Mutex<VecDeque<SocketPair>>,
    }

    impl MemoryConnector {
        fn with_sessions(n: usize) -> (Arc<Self>, Vec<Peer>) {
            let connector = Arc::new(Self::default());
            let mut peers = Vec::new();
            for _ in 0..n {
                let (out_tx, out_rx) = mpsc::channel(16);
                let (in_tx, in_rx) = mpsc::channel(16);
                connector
                    .sessions
                    .lock()
                    .push_back(SocketPair { outbound: out_tx, inbound: in_rx });
                peers.push(Peer { from_client: out_rx, to_client: in_tx });
            }
            (connector, peers)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn open(&self) -> Result<SocketPair, ChatError> {
            self.sessions
                .lock()
                .pop_front()
                .ok_or_else(|| ChatError::Transport("connection refused".into()))
        }
    }

    fn me() -> SelfIdentity {
        SelfIdentity { user_id: UserId::new(5).unwrap(), username: "ada".into() }
    }

    fn room() -> RoomId {
        "5-12".parse().unwrap()
    }

    fn push(id: u32) -> String {
        format!(
            r#"{{"type":"chat_message","id":{id},"senderId":12,"content":"c{id}","timestamp":"2024-03-01T10:00:00Z","messageType":"system"}}"#
        )
    }

    async fn wait_for_state(channel: &TransportChannel, want: ChannelState) {
        let mut rx = channel.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state timeout")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn join_is_first_frame_and_frames_arrive_in_order() {
        let (connector, mut peers) = MemoryConnector::with_sessions(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector, ReconnectPolicy::Never, tx);

        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Connecting);
        channel.join(&room(), &me()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Joined(room()));

        let first: serde_json::Value =
            serde_json::from_str(&peers[0].from_client.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "join_room");
        assert_eq!(first["roomId"], "5-12");

        for id in 1..=5 {
            peers[0].to_client.send(push(id)).await.unwrap();
        }
        for id in 1..=5 {
            match rx.recv().await.unwrap() {
                ServerFrame::ChatMessage(wire) => assert_eq!(wire.id.as_str(), id.to_string()),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (connector, peers) = MemoryConnector::with_sessions(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector, ReconnectPolicy::Never, tx);
        channel.connect().await.unwrap();

        peers[0].to_client.send("{not json".into()).await.unwrap();
        peers[0].to_client.send(push(9)).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::ChatMessage(_)));
    }

    #[tokio::test]
    async fn connect_failure_is_reported_and_leaves_disconnected() {
        let (connector, _) = MemoryConnector::with_sessions(0);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector, ReconnectPolicy::Never, tx);

        assert!(matches!(channel.connect().await, Err(ChatError::Transport(_))));
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(matches!(channel.join(&room(), &me()).await, Err(ChatError::Transport(_))));
    }

    #[tokio::test]
    async fn leave_sends_frame_and_disconnects() {
        let (connector, mut peers) = MemoryConnector::with_sessions(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector, ReconnectPolicy::Never, tx);
        channel.connect().await.unwrap();
        channel.join(&room(), &me()).await.unwrap();

        channel.leave(&room(), &me()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);

        let _join = peers[0].from_client.recv().await.unwrap();
        let leave: serde_json::Value =
            serde_json::from_str(&peers[0].from_client.recv().await.unwrap()).unwrap();
        assert_eq!(leave["type"], "leave_room");
        // Outbound queue is gone once the channel let go of it.
        assert!(peers[0].from_client.recv().await.is_none());
    }

    #[tokio::test]
    async fn drop_without_policy_stays_disconnected() {
        let (connector, mut peers) = MemoryConnector::with_sessions(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector.clone(), ReconnectPolicy::Never, tx);
        channel.connect().await.unwrap();
        channel.join(&room(), &me()).await.unwrap();

        let first = peers.remove(0);
        drop(first.to_client);
        wait_for_state(&channel, ChannelState::Disconnected).await;
        // The spare session was never used.
        assert_eq!(connector.sessions.lock().len(), 1);
    }

    #[tokio::test]
    async fn backoff_policy_reconnects_and_rejoins() {
        let (connector, mut peers) = MemoryConnector::with_sessions(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(10),
            max_attempts: 3,
        };
        let channel = TransportChannel::new(connector, policy, tx);
        channel.connect().await.unwrap();
        channel.join(&room(), &me()).await.unwrap();

        let mut second = peers.pop().unwrap();
        let first = peers.pop().unwrap();
        drop(first.to_client);

        let rejoin = tokio::time::timeout(Duration::from_secs(2), second.from_client.recv())
            .await
            .unwrap()
            .unwrap();
        let rejoin: serde_json::Value = serde_json::from_str(&rejoin).unwrap();
        assert_eq!(rejoin["type"], "join_room");
        wait_for_state(&channel, ChannelState::Joined(room())).await;

        second.to_client.send(push(42)).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::ChatMessage(_)));
    }

    #[tokio::test]
    async fn connect_after_drop_opens_a_fresh_socket() {
        let (connector, mut peers) = MemoryConnector::with_sessions(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector.clone(), ReconnectPolicy::Never, tx);
        channel.connect().await.unwrap();
        channel.join(&room(), &me()).await.unwrap();

        let first = peers.remove(0);
        drop(first.to_client);
        wait_for_state(&channel, ChannelState::Disconnected).await;

        channel.connect().await.unwrap();
        assert!(connector.sessions.lock().is_empty());
        channel.join(&room(), &me()).await.unwrap();

        let join: serde_json::Value =
            serde_json::from_str(&peers[0].from_client.recv().await.unwrap()).unwrap();
        assert_eq!(join["type"], "join_room");
    }

    #[tokio::test]
    async fn shutdown_during_backoff_cancels_reconnect() {
        let (connector, mut peers) = MemoryConnector::with_sessions(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(100),
            max_attempts: 3,
        };
        let channel = TransportChannel::new(connector.clone(), policy, tx);
        channel.connect().await.unwrap();
        channel.join(&room(), &me()).await.unwrap();

        let first = peers.remove(0);
        drop(first.to_client);
        wait_for_state(&channel, ChannelState::Disconnected).await;

        channel.shutdown(&me()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connector.sessions.lock().len(), 1);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(peers[0].from_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_while_joined_sends_leave() {
        let (connector, mut peers) = MemoryConnector::with_sessions(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector, ReconnectPolicy::Never, tx);
        channel.connect().await.unwrap();
        channel.join(&room(), &me()).await.unwrap();

        channel.shutdown(&me()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        let _join = peers[0].from_client.recv().await.unwrap();
        let leave: serde_json::Value =
            serde_json::from_str(&peers[0].from_client.recv().await.unwrap()).unwrap();
        assert_eq!(leave["type"], "leave_room");
        assert_eq!(leave["roomId"], "5-12");
    }

    #[tokio::test]
    async fn shutdown_before_connect_is_quiet() {
        let (connector, _) = MemoryConnector::with_sessions(0);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = TransportChannel::new(connector, ReconnectPolicy::Never, tx);
        channel.shutdown(&me()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[test]
    fn backoff_delays_double_and_cap() {
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            max_attempts: 5,
        };
        let delays: Vec<_> = (0..6).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(5)),
                Some(Duration::from_secs(5)),
                None,
            ]
        );
        assert_eq!(ReconnectPolicy::Never.delay_for(0), None);
    }
}
