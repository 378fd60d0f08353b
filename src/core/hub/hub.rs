use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocket;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::client::Client;
use super::message::{Envelope, HeartbeatData, MessageType};

/// Clients silent for longer than this are disconnected.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(120);
const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SERVER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);

/// Writer-side protocol ping cadence; must stay below the read deadline.
pub(crate) const READ_DEADLINE: Duration = Duration::from_secs(60);
pub(crate) const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum inbound frame size in bytes, enforced at upgrade time.
pub const MAX_INBOUND_FRAME: usize = 512;

const OUTBOUND_BUFFER: usize = 256;
const SERVER_ID: &str = "ampd";

struct Broadcast {
    message_type: MessageType,
    task_id: Option<String>,
    payload: String,
}

enum HubCommand {
    Register(Arc<Client>),
    Unregister(Arc<Client>),
    Broadcast(Broadcast),
}

/// Event broker. Owns the client set inside a single cooperative loop;
/// everything reaches it through the command channel, so no lock is shared
/// with the pumps.
pub struct Hub {
    inbox: mpsc::UnboundedReceiver<HubCommand>,
    handle: HubHandle,
}

/// Cheap clonable handle used by the web layer and the supervisor callbacks
/// to feed the hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let handle = HubHandle {
            commands,
            shutdown: CancellationToken::new(),
        };
        (
            Self {
                inbox,
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// The hub loop. Each iteration handles exactly one command or tick.
    pub async fn run(mut self) {
        let mut clients: HashMap<String, Arc<Client>> = HashMap::new();

        let start = tokio::time::Instant::now();
        let mut heartbeat_check =
            tokio::time::interval_at(start + HEARTBEAT_CHECK_INTERVAL, HEARTBEAT_CHECK_INTERVAL);
        let mut server_heartbeat = tokio::time::interval_at(
            start + SERVER_HEARTBEAT_INTERVAL,
            SERVER_HEARTBEAT_INTERVAL,
        );

        loop {
            tokio::select! {
                _ = self.handle.shutdown.cancelled() => {
                    for client in clients.values() {
                        client.disconnect();
                    }
                    return;
                }
                command = self.inbox.recv() => {
                    match command {
                        None => return,
                        Some(HubCommand::Register(client)) => {
                            client.set_connected(true);
                            info!("client registered: {}", client.id);
                            clients.insert(client.id.clone(), client);
                        }
                        Some(HubCommand::Unregister(client)) => {
                            if let Some(client) = clients.remove(&client.id) {
                                client.disconnect();
                                info!("client unregistered: {}", client.id);
                            }
                        }
                        Some(HubCommand::Broadcast(broadcast)) => {
                            Self::fan_out(&mut clients, &broadcast);
                        }
                    }
                }
                _ = heartbeat_check.tick() => {
                    Self::evict_idle_clients(&mut clients);
                }
                _ = server_heartbeat.tick() => {
                    Self::send_server_heartbeat(&mut clients);
                }
            }
        }
    }

    fn fan_out(clients: &mut HashMap<String, Arc<Client>>, broadcast: &Broadcast) {
        // Subscription filtering applies to task-scoped event types; hub
        // housekeeping traffic (heartbeat) always goes through.
        let filtered = matches!(
            broadcast.message_type,
            MessageType::TaskUpdate | MessageType::Log | MessageType::ThreadMessage
        );

        let mut evicted: Vec<String> = Vec::new();
        for client in clients.values() {
            if !client.is_connected() {
                continue;
            }
            if filtered
                && !client.should_receive(broadcast.message_type, broadcast.task_id.as_deref())
            {
                continue;
            }
            if !client.try_enqueue(broadcast.payload.clone()) {
                evicted.push(client.id.clone());
            }
        }

        // Slow-consumer policy: a full buffer drops the client, never the hub.
        for id in evicted {
            if let Some(client) = clients.remove(&id) {
                client.disconnect();
                warn!("client {} evicted: outbound buffer overflow", id);
            }
        }
    }

    fn evict_idle_clients(clients: &mut HashMap<String, Arc<Client>>) {
        let now = Instant::now();
        let timed_out: Vec<String> = clients
            .values()
            .filter(|client| {
                client.is_connected()
                    && now.duration_since(client.last_heartbeat()) > HEARTBEAT_TIMEOUT
            })
            .map(|client| client.id.clone())
            .collect();

        for id in timed_out {
            if let Some(client) = clients.remove(&id) {
                client.disconnect();
                info!("client {} timed out, disconnecting", id);
            }
        }
    }

    fn send_server_heartbeat(clients: &mut HashMap<String, Arc<Client>>) {
        let heartbeat = HeartbeatData {
            timestamp: Utc::now(),
            server_id: SERVER_ID.to_string(),
        };
        let payload = match Envelope::new(MessageType::Heartbeat, heartbeat)
            .and_then(|envelope| envelope.to_json())
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode server heartbeat: {}", err);
                return;
            }
        };

        let broadcast = Broadcast {
            message_type: MessageType::Heartbeat,
            task_id: None,
            payload,
        };
        Self::fan_out(clients, &broadcast);
    }
}

impl HubHandle {
    /// Serializes `data` into an envelope and fans it out. `task_id` is the
    /// best-effort task association used for subscription filtering.
    pub fn broadcast_event(
        &self,
        message_type: MessageType,
        task_id: Option<String>,
        data: impl Serialize,
    ) {
        let payload = match Envelope::new(message_type, data).and_then(|env| env.to_json()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode {:?} event: {}", message_type, err);
                return;
            }
        };
        let _ = self.commands.send(HubCommand::Broadcast(Broadcast {
            message_type,
            task_id,
            payload,
        }));
    }

    /// Accepts an upgraded socket: registers a client and starts its pumps.
    pub fn accept_socket(&self, socket: WebSocket) {
        let (sink, stream) = socket.split();
        let (sender, outbound) = mpsc::channel(OUTBOUND_BUFFER);
        let client = Arc::new(Client::new(short_client_id(), sender));

        self.register(client.clone());
        tokio::spawn(client.clone().write_pump(outbound, sink));
        tokio::spawn(client.read_pump(stream, self.clone()));
    }

    /// Stops the hub loop and disconnects every client.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn register(&self, client: Arc<Client>) {
        let _ = self.commands.send(HubCommand::Register(client));
    }

    pub(crate) fn unregister(&self, client: Arc<Client>) {
        let _ = self.commands.send(HubCommand::Unregister(client));
    }
}

fn short_client_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::super::client::Client;
    use super::super::message::MessageType;
    use super::{Hub, HubHandle};

    async fn running_hub() -> HubHandle {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());
        handle
    }

    fn test_client(id: &str, capacity: usize) -> (Arc<Client>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Client::new(id, tx)), rx)
    }

    async fn recv_payload(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for payload")
            .expect("channel closed");
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connected_client_once() {
        let handle = running_hub().await;
        let (client_a, mut rx_a) = test_client("a", 8);
        let (client_b, mut rx_b) = test_client("b", 8);
        handle.register(client_a);
        handle.register(client_b);
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.broadcast_event(
            MessageType::TaskUpdate,
            Some("task1".to_string()),
            json!({"id": "task1", "status": "running"}),
        );

        let value_a = recv_payload(&mut rx_a).await;
        let value_b = recv_payload(&mut rx_b).await;
        assert_eq!(value_a["type"], "task-update");
        assert_eq!(value_b["data"]["id"], "task1");

        // At most one enqueue per client per broadcast.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_clients_no_longer_receive() {
        let handle = running_hub().await;
        let (client, mut rx) = test_client("gone", 8);
        handle.register(client.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.unregister(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.broadcast_event(MessageType::Log, None, json!({"content": "x"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn buffer_overflow_evicts_the_slow_consumer() {
        let handle = running_hub().await;
        let (slow, mut slow_rx) = test_client("slow", 1);
        let (healthy, mut healthy_rx) = test_client("healthy", 8);
        handle.register(slow);
        handle.register(healthy);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Second broadcast overflows the one-slot buffer.
        handle.broadcast_event(MessageType::Log, None, json!({"n": 1}));
        handle.broadcast_event(MessageType::Log, None, json!({"n": 2}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The healthy client saw both; the slow one was evicted and its
        // buffer no longer grows.
        assert_eq!(recv_payload(&mut healthy_rx).await["data"]["n"], json!(1));
        assert_eq!(recv_payload(&mut healthy_rx).await["data"]["n"], json!(2));

        handle.broadcast_event(MessageType::Log, None, json!({"n": 3}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slow_rx.recv().await.unwrap().contains("\"n\":1"), true);
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stopping_the_hub_disconnects_clients() {
        let (hub, handle) = Hub::new();
        let run = tokio::spawn(hub.run());

        let (client, _rx) = test_client("c", 8);
        handle.register(client.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("hub loop should exit")
            .unwrap();
        assert!(!client.is_connected());
    }
}
