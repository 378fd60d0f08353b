use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket message discriminator. `task-update`, `log`, `thread_message`,
/// `pong`, and `heartbeat` flow outbound; `ping`, `subscribe`, and
/// `unsubscribe` inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "task-update")]
    TaskUpdate,
    #[serde(rename = "log")]
    Log,
    #[serde(rename = "thread_message")]
    ThreadMessage,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "subscribe")]
    Subscribe,
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
}

/// The outer `{type, data, timestamp, id}` object carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    pub fn new(message_type: MessageType, data: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_type,
            data: Some(serde_json::to_value(data)?),
            timestamp: Some(Utc::now()),
            id: None,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PingData {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PongData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeData {
    #[serde(default)]
    pub types: Vec<MessageType>,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatData {
    pub timestamp: DateTime<Utc>,
    pub server_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Envelope, MessageType, SubscribeData};

    #[test]
    fn message_types_use_their_wire_names() {
        assert_eq!(
            serde_json::to_value(MessageType::TaskUpdate).unwrap(),
            json!("task-update")
        );
        assert_eq!(
            serde_json::to_value(MessageType::ThreadMessage).unwrap(),
            json!("thread_message")
        );
        assert_eq!(serde_json::to_value(MessageType::Log).unwrap(), json!("log"));
    }

    #[test]
    fn envelope_round_trips_with_data() {
        let envelope = Envelope::new(MessageType::Log, json!({"content": "hi"})).unwrap();
        let raw = envelope.to_json().unwrap();
        let parsed = Envelope::parse(&raw).unwrap();
        assert_eq!(parsed.message_type, MessageType::Log);
        assert_eq!(parsed.data.unwrap()["content"], json!("hi"));
        assert!(parsed.timestamp.is_some());
    }

    #[test]
    fn unknown_inbound_types_fail_to_parse() {
        assert!(Envelope::parse(r#"{"type":"mystery"}"#).is_err());
        assert!(Envelope::parse("not json at all").is_err());
    }

    #[test]
    fn subscribe_data_tolerates_missing_fields() {
        let data: SubscribeData = serde_json::from_value(json!({"types": ["log"]})).unwrap();
        assert_eq!(data.types, vec![MessageType::Log]);
        assert!(data.task_ids.is_empty());

        let data: SubscribeData = serde_json::from_value(json!({})).unwrap();
        assert!(data.types.is_empty());
    }
}
