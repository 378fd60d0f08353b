use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::hub::{HubHandle, PING_PERIOD, READ_DEADLINE};
use super::message::{Envelope, MessageType, PingData, PongData, SubscribeData};

/// One connected WebSocket client. The hub owns the client set; the client
/// holds only what its two pumps need. Buffer closure (via the cancellation
/// token) means "disconnect": the pumps release their halves of the socket
/// and never touch the hub again.
pub struct Client {
    pub(crate) id: String,
    sender: mpsc::Sender<String>,
    shutdown: CancellationToken,
    state: Mutex<ClientState>,
}

struct ClientState {
    subscribed_types: HashSet<MessageType>,
    subscribed_tasks: HashSet<String>,
    last_heartbeat: Instant,
    last_pong: Instant,
    connected: bool,
}

impl Client {
    pub(crate) fn new(id: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            shutdown: CancellationToken::new(),
            state: Mutex::new(ClientState {
                subscribed_types: HashSet::new(),
                subscribed_tasks: HashSet::new(),
                last_heartbeat: Instant::now(),
                last_pong: Instant::now(),
                connected: false,
            }),
        }
    }

    /// Default-on semantics: a client with no subscriptions receives
    /// everything. Otherwise a message passes if its type or its task id is
    /// subscribed.
    pub(crate) fn should_receive(&self, message_type: MessageType, task_id: Option<&str>) -> bool {
        let state = self.state.lock().unwrap();
        if state.subscribed_types.is_empty() && state.subscribed_tasks.is_empty() {
            return true;
        }
        if state.subscribed_types.contains(&message_type) {
            return true;
        }
        match task_id {
            Some(task_id) if !task_id.is_empty() => state.subscribed_tasks.contains(task_id),
            _ => false,
        }
    }

    /// Non-blocking enqueue. `false` means the buffer is full (or closed)
    /// and the hub should evict this client.
    pub(crate) fn try_enqueue(&self, payload: String) -> bool {
        self.sender.try_send(payload).is_ok()
    }

    pub(crate) fn disconnect(&self) {
        self.set_connected(false);
        self.shutdown.cancel();
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub(crate) fn last_heartbeat(&self) -> Instant {
        self.state.lock().unwrap().last_heartbeat
    }

    fn touch_heartbeat(&self) {
        self.state.lock().unwrap().last_heartbeat = Instant::now();
    }

    fn touch_pong(&self) {
        self.state.lock().unwrap().last_pong = Instant::now();
    }

    fn apply_subscribe(&self, data: SubscribeData) {
        let mut state = self.state.lock().unwrap();
        state.subscribed_types.extend(data.types);
        state.subscribed_tasks.extend(data.task_ids);
    }

    fn apply_unsubscribe(&self, data: SubscribeData) {
        let mut state = self.state.lock().unwrap();
        for message_type in data.types {
            state.subscribed_types.remove(&message_type);
        }
        for task_id in data.task_ids {
            state.subscribed_tasks.remove(&task_id);
        }
    }

    /// Writer pump: drains the outbound buffer into text frames, coalescing
    /// anything already queued into one newline-separated frame, and keeps
    /// the transport alive with periodic protocol pings.
    pub(crate) async fn write_pump(
        self: std::sync::Arc<Self>,
        mut outbound: mpsc::Receiver<String>,
        mut sink: SplitSink<WebSocket, Message>,
    ) {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_PERIOD,
            PING_PERIOD,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                next = outbound.recv() => {
                    let mut payload = match next {
                        Some(payload) => payload,
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                    };
                    while let Ok(queued) = outbound.try_recv() {
                        payload.push('\n');
                        payload.push_str(&queued);
                    }
                    if sink.send(Message::Text(payload.into())).await.is_err() {
                        return;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Reader pump: one framed message at a time under a read deadline that
    /// every frame re-arms. Errors (including oversized frames) end the
    /// connection.
    pub(crate) async fn read_pump(
        self: std::sync::Arc<Self>,
        mut stream: SplitStream<WebSocket>,
        hub: HubHandle,
    ) {
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = tokio::time::timeout(READ_DEADLINE, stream.next()) => frame,
            };

            match frame {
                // Read deadline expired without any traffic.
                Err(_) => break,
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!("client {} read error: {}", self.id, err);
                    break;
                }
                Ok(Some(Ok(Message::Text(text)))) => self.handle_inbound(text.as_str()),
                Ok(Some(Ok(Message::Pong(_)))) => self.touch_pong(),
                Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(_))) => {}
            }
        }

        hub.unregister(self.clone());
        self.shutdown.cancel();
    }

    /// Dispatches one inbound envelope. Malformed JSON and unknown types are
    /// ignored without dropping the connection.
    fn handle_inbound(&self, raw: &str) {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("client {} sent unparseable message: {}", self.id, err);
                return;
            }
        };

        self.touch_heartbeat();

        match envelope.message_type {
            MessageType::Ping => {
                let ping: PingData = envelope
                    .data
                    .and_then(|data| serde_json::from_value(data).ok())
                    .unwrap_or_default();
                let pong = PongData {
                    id: ping.id.clone(),
                    ping_id: ping.id,
                    timestamp: Utc::now(),
                };
                match Envelope::new(MessageType::Pong, pong).and_then(|env| env.to_json()) {
                    Ok(payload) => {
                        if !self.try_enqueue(payload) {
                            warn!("client {} outbound buffer full, pong dropped", self.id);
                        }
                    }
                    Err(err) => warn!("failed to encode pong for client {}: {}", self.id, err),
                }
            }
            MessageType::Subscribe => {
                if let Some(data) = envelope.data {
                    if let Ok(data) = serde_json::from_value::<SubscribeData>(data) {
                        self.apply_subscribe(data);
                    }
                }
            }
            MessageType::Unsubscribe => {
                if let Some(data) = envelope.data {
                    if let Ok(data) = serde_json::from_value::<SubscribeData>(data) {
                        self.apply_unsubscribe(data);
                    }
                }
            }
            other => debug!("client {} sent unexpected type {:?}", self.id, other),
        }
    }
}
