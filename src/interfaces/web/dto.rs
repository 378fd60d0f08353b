use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::worker::{ThreadMessage, Worker};

/// Task as exposed to clients. The pid stays internal; the log file path is
/// kept because clients use it as an identifier.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDto {
    pub id: String,
    pub thread_id: String,
    pub status: String,
    pub started: DateTime<Utc>,
    pub log_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl From<&Worker> for TaskDto {
    fn from(worker: &Worker) -> Self {
        Self {
            id: worker.id.clone(),
            thread_id: worker.thread_id.clone(),
            status: worker.status.as_str().to_string(),
            started: worker.started,
            log_file: worker.log_file.clone(),
            title: worker.title.clone(),
            description: worker.description.clone(),
            tags: worker.tags.clone(),
            priority: worker.priority.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    #[serde(default)]
    pub message: String,
}

/// PATCH body with explicit presence semantics: absent fields stay
/// untouched, `tags: []` clears the list.
#[derive(Debug, Default, Deserialize)]
pub struct PatchTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedTasksResponse {
    pub tasks: Vec<TaskDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadMessageDto {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<&ThreadMessage> for ThreadMessageDto {
    fn from(message: &ThreadMessage) -> Self {
        Self {
            id: message.id.clone(),
            message_type: serde_json::to_value(message.message_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            metadata: message.metadata.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedThreadResponse {
    pub messages: Vec<ThreadMessageDto>,
    pub has_more: bool,
    pub total: usize,
}
