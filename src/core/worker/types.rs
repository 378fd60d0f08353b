use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states a supervised worker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Stopped,
    Interrupted,
    Aborted,
    Failed,
    Completed,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Interrupted => "interrupted",
            WorkerStatus::Aborted => "aborted",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Completed => "completed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(WorkerStatus::Running),
            "stopped" => Some(WorkerStatus::Stopped),
            "interrupted" => Some(WorkerStatus::Interrupted),
            "aborted" => Some(WorkerStatus::Aborted),
            "failed" => Some(WorkerStatus::Failed),
            "completed" => Some(WorkerStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns whether a worker may move from one status to another.
///
/// `completed` and `failed` are only ever entered by the exit monitor; every
/// non-running state allows a retry back to `running`.
pub fn can_transition(from: WorkerStatus, to: WorkerStatus) -> bool {
    match from {
        WorkerStatus::Running => matches!(
            to,
            WorkerStatus::Stopped
                | WorkerStatus::Interrupted
                | WorkerStatus::Aborted
                | WorkerStatus::Completed
                | WorkerStatus::Failed
        ),
        WorkerStatus::Stopped => matches!(to, WorkerStatus::Running | WorkerStatus::Aborted),
        WorkerStatus::Interrupted => matches!(to, WorkerStatus::Running | WorkerStatus::Aborted),
        WorkerStatus::Aborted => matches!(to, WorkerStatus::Running),
        WorkerStatus::Failed => matches!(to, WorkerStatus::Running),
        WorkerStatus::Completed => matches!(to, WorkerStatus::Running),
    }
}

/// Persistent record of one supervised task: a spawned pipeline, its log
/// file, and the amp thread it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub thread_id: String,
    pub pid: i32,
    pub log_file: String,
    pub started: DateTime<Utc>,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Role of a reconstructed conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Assistant,
    System,
    Tool,
}

/// One message in a task's conversation journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::{can_transition, WorkerStatus};

    #[test]
    fn running_worker_can_reach_every_terminal_state() {
        let targets = [
            WorkerStatus::Stopped,
            WorkerStatus::Interrupted,
            WorkerStatus::Aborted,
            WorkerStatus::Completed,
            WorkerStatus::Failed,
        ];
        for to in targets {
            assert!(
                can_transition(WorkerStatus::Running, to),
                "expected transition running -> {:?} to be allowed",
                to
            );
        }
    }

    #[test]
    fn every_non_running_state_allows_retry() {
        let from_states = [
            WorkerStatus::Stopped,
            WorkerStatus::Interrupted,
            WorkerStatus::Aborted,
            WorkerStatus::Failed,
            WorkerStatus::Completed,
        ];
        for from in from_states {
            assert!(
                can_transition(from, WorkerStatus::Running),
                "expected retry from {:?}",
                from
            );
        }
    }

    #[test]
    fn terminal_states_are_exit_monitor_only() {
        assert!(!can_transition(WorkerStatus::Stopped, WorkerStatus::Completed));
        assert!(!can_transition(WorkerStatus::Stopped, WorkerStatus::Failed));
        assert!(!can_transition(WorkerStatus::Aborted, WorkerStatus::Completed));
        assert!(!can_transition(WorkerStatus::Interrupted, WorkerStatus::Failed));
    }

    #[test]
    fn same_state_transitions_are_rejected() {
        let all = [
            WorkerStatus::Running,
            WorkerStatus::Stopped,
            WorkerStatus::Interrupted,
            WorkerStatus::Aborted,
            WorkerStatus::Failed,
            WorkerStatus::Completed,
        ];
        for state in all {
            assert!(!can_transition(state, state), "{:?} -> {:?}", state, state);
        }
    }

    #[test]
    fn abort_is_reachable_from_stopped_and_interrupted_only() {
        assert!(can_transition(WorkerStatus::Stopped, WorkerStatus::Aborted));
        assert!(can_transition(WorkerStatus::Interrupted, WorkerStatus::Aborted));
        assert!(!can_transition(WorkerStatus::Completed, WorkerStatus::Aborted));
        assert!(!can_transition(WorkerStatus::Failed, WorkerStatus::Aborted));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            WorkerStatus::Running,
            WorkerStatus::Stopped,
            WorkerStatus::Interrupted,
            WorkerStatus::Aborted,
            WorkerStatus::Failed,
            WorkerStatus::Completed,
        ] {
            assert_eq!(WorkerStatus::from_status(status.as_str()), Some(status));
        }
        assert_eq!(WorkerStatus::from_status("paused"), None);
    }
}
