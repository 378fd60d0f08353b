use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::types::{MessageType, ThreadMessage};

/// One line of amp's JSONL log. Only `thread-state` events matter here.
#[derive(Debug, Deserialize)]
struct AmpLogEntry {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    event: Option<ThreadEvent>,
}

#[derive(Debug, Deserialize)]
struct ThreadEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    thread: Option<ThreadSnapshot>,
}

/// A cumulative snapshot of the conversation. Each snapshot supersedes the
/// previous one entirely.
#[derive(Debug, Clone, Deserialize)]
struct ThreadSnapshot {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    messages: Vec<AmpMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct AmpMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Vec<AmpContent>,
    #[serde(default)]
    meta: Option<AmpMessageMeta>,
}

#[derive(Debug, Clone, Deserialize)]
struct AmpContent {
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thinking: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    input: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct AmpMessageMeta {
    #[serde(rename = "sentAt", default)]
    sent_at: i64,
}

pub type ThreadMessageSink = Arc<dyn Fn(ThreadMessage) + Send + Sync>;

/// Reconstructs a turn-based conversation from amp's JSONL log.
///
/// amp emits cumulative snapshots rather than deltas, so the parser only
/// retains the latest one. When the producing process exits the supervisor
/// calls [`process_final_conversation`](Self::process_final_conversation),
/// which emits the final state exactly once.
pub struct AmpLogParser {
    on_message: ThreadMessageSink,
    latest: Option<ThreadSnapshot>,
    last_update: DateTime<Utc>,
    processed: bool,
}

impl AmpLogParser {
    pub fn new(on_message: ThreadMessageSink) -> Self {
        Self {
            on_message,
            latest: None,
            last_update: Utc::now(),
            processed: false,
        }
    }

    /// Feeds one raw log line. Non-JSON lines (interleaved stdout) are
    /// silently ignored.
    pub fn parse_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let entry: AmpLogEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) => return,
        };

        if let Some(event) = entry.event {
            if event.event_type == "thread-state" {
                if let Some(thread) = event.thread {
                    self.latest = Some(thread);
                    self.last_update = entry.timestamp.unwrap_or_else(Utc::now);
                    self.processed = false;
                }
            }
        }
    }

    /// Emits the final conversation from the latest snapshot. Idempotent:
    /// a second call after processing emits nothing.
    pub fn process_final_conversation(&mut self) {
        let thread = match (&self.latest, self.processed) {
            (Some(thread), false) => thread.clone(),
            _ => return,
        };

        if !thread.title.is_empty() {
            let mut metadata = serde_json::Map::new();
            metadata.insert("thread_id".to_string(), Value::String(thread.id.clone()));
            metadata.insert(
                "thread_title".to_string(),
                Value::String(thread.title.clone()),
            );
            self.emit(
                MessageType::System,
                format!("Thread: {}", thread.title),
                self.last_update,
                Some(metadata),
            );
        }

        for message in &thread.messages {
            let timestamp = message
                .meta
                .as_ref()
                .filter(|meta| meta.sent_at > 0)
                .and_then(|meta| Utc.timestamp_millis_opt(meta.sent_at).single())
                .unwrap_or(self.last_update);

            match message.role.as_str() {
                "user" => self.process_user_message(message, timestamp),
                "assistant" => self.process_assistant_message(message, timestamp),
                _ => {}
            }
        }

        self.processed = true;
    }

    fn process_user_message(&self, message: &AmpMessage, timestamp: DateTime<Utc>) {
        // tool_result content is system-level feedback, not user input.
        for content in &message.content {
            if content.content_type == "text" && !content.text.trim().is_empty() {
                self.emit(
                    MessageType::User,
                    content.text.trim().to_string(),
                    timestamp,
                    None,
                );
            }
        }
    }

    fn process_assistant_message(&self, message: &AmpMessage, timestamp: DateTime<Utc>) {
        for content in &message.content {
            if content.content_type == "thinking" && !content.thinking.trim().is_empty() {
                let mut metadata = serde_json::Map::new();
                metadata.insert("type".to_string(), Value::String("thinking".to_string()));
                self.emit(
                    MessageType::Assistant,
                    content.thinking.trim().to_string(),
                    timestamp,
                    Some(metadata),
                );
            }
        }

        for content in &message.content {
            if content.content_type == "tool_use" && !content.name.is_empty() {
                let mut metadata = serde_json::Map::new();
                metadata.insert("type".to_string(), Value::String("tool_use".to_string()));
                metadata.insert("tool_name".to_string(), Value::String(content.name.clone()));
                metadata.insert("tool_id".to_string(), Value::String(content.id.clone()));
                metadata.insert(
                    "input".to_string(),
                    content
                        .input
                        .clone()
                        .map(Value::Object)
                        .unwrap_or(Value::Null),
                );
                self.emit(
                    MessageType::Tool,
                    format_tool_use(content),
                    timestamp,
                    Some(metadata),
                );
            }
        }

        for content in &message.content {
            if content.content_type == "text" && !content.text.trim().is_empty() {
                self.emit(
                    MessageType::Assistant,
                    content.text.trim().to_string(),
                    timestamp,
                    None,
                );
            }
        }
    }

    fn emit(
        &self,
        message_type: MessageType,
        content: String,
        timestamp: DateTime<Utc>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) {
        if content.trim().is_empty() {
            return;
        }
        (self.on_message)(ThreadMessage {
            id: Uuid::new_v4().to_string(),
            message_type,
            content,
            timestamp,
            metadata,
        });
    }
}

fn string_input<'a>(content: &'a AmpContent, key: &str) -> Option<&'a str> {
    content.input.as_ref()?.get(key)?.as_str()
}

/// Human-readable one-line summary of a tool invocation.
fn format_tool_use(content: &AmpContent) -> String {
    match content.name.as_str() {
        "create_file" => match string_input(content, "path") {
            Some(path) => format!("Creating file: {}", path),
            None => "Creating file".to_string(),
        },
        "edit_file" => match string_input(content, "path") {
            Some(path) => format!("Editing file: {}", path),
            None => "Editing file".to_string(),
        },
        "read_file" => match string_input(content, "path") {
            Some(path) => format!("Reading file: {}", path),
            None => "Reading file".to_string(),
        },
        "Bash" => match string_input(content, "cmd") {
            Some(cmd) => format!("Running command: {}", truncate_command(cmd)),
            None => "Running command".to_string(),
        },
        "Grep" => match string_input(content, "pattern") {
            Some(pattern) => format!("Searching for: {}", pattern),
            None => "Searching files".to_string(),
        },
        "glob" => match string_input(content, "filePattern") {
            Some(pattern) => format!("Finding files: {}", pattern),
            None => "Finding files".to_string(),
        },
        name => format!("Using tool: {}", name),
    }
}

fn truncate_command(cmd: &str) -> String {
    if cmd.chars().count() > 100 {
        let head: String = cmd.chars().take(97).collect();
        format!("{}...", head)
    } else {
        cmd.to_string()
    }
}
