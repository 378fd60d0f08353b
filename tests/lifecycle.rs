//! End-to-end worker lifecycle tests against a fake `amp` binary.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use ampd::core::hub::{Hub, MessageType};
use ampd::core::worker::{LogLine, ThreadMessage, Worker, WorkerManager, WorkerStatus};
use ampd::interfaces::web::{self, AppState, TaskDto};

const THREAD_ID: &str = "T-abcdefgh-1111-2222-3333-444455556666";

/// Writes a fake `amp` whose `threads continue` branch runs `continue_body`.
fn write_fake_amp(dir: &Path, name: &str, continue_body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"threads\" ] && [ \"$2\" = \"new\" ]; then\n\
         \x20 echo \"{}\"\n\
         \x20 exit 0\n\
         fi\n\
         if [ \"$1\" = \"threads\" ] && [ \"$2\" = \"continue\" ]; then\n\
         \x20 cat > /dev/null\n\
         {}\n\
         fi\n\
         exit 1\n",
        THREAD_ID, continue_body
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn simple_amp(dir: &Path) -> PathBuf {
    write_fake_amp(dir, "amp", "  echo \"hello\"\n  exit 0")
}

struct Harness {
    manager: Arc<WorkerManager>,
    logs: mpsc::UnboundedReceiver<LogLine>,
    exits: mpsc::UnboundedReceiver<Worker>,
    thread_messages: mpsc::UnboundedReceiver<ThreadMessage>,
}

fn harness(log_dir: &Path, amp_binary: &Path) -> Harness {
    let manager = Arc::new(
        WorkerManager::new(log_dir, amp_binary.to_str().unwrap()).unwrap(),
    );

    let (log_tx, logs) = mpsc::unbounded_channel();
    manager.set_log_callback(Arc::new(move |line| {
        let _ = log_tx.send(line);
    }));

    let (exit_tx, exits) = mpsc::unbounded_channel();
    manager.set_exit_callback(Arc::new(move |worker| {
        let _ = exit_tx.send(worker.clone());
    }));

    let (thread_tx, thread_messages) = mpsc::unbounded_channel();
    manager.set_thread_message_callback(Arc::new(move |_worker_id, message| {
        let _ = thread_tx.send(message.clone());
    }));

    Harness {
        manager,
        logs,
        exits,
        thread_messages,
    }
}

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .unwrap_or_else(|| panic!("channel closed waiting for {}", what))
}

#[tokio::test]
async fn happy_start_streams_logs_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let amp = simple_amp(dir.path());
    let mut harness = harness(dir.path(), &amp);

    let worker = harness.manager.start_worker("hi").await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Running);
    assert_eq!(worker.id.len(), 8);
    assert_eq!(worker.thread_id, THREAD_ID);

    let line = recv_within(&mut harness.logs, "log line").await;
    assert_eq!(line.worker_id, worker.id);
    assert_eq!(line.content, "hello");

    let exited = recv_within(&mut harness.exits, "worker exit").await;
    assert_eq!(exited.id, worker.id);
    assert_eq!(exited.status, WorkerStatus::Completed);

    let reloaded = harness.manager.get_worker(&worker.id).await.unwrap();
    assert_eq!(reloaded.status, WorkerStatus::Completed);

    assert_eq!(std::fs::read_to_string(&worker.log_file).unwrap(), "hello\n");
    assert!(!harness.manager.has_tailer(&worker.id));
}

#[tokio::test]
async fn nonzero_exit_marks_the_worker_failed() {
    let dir = tempfile::tempdir().unwrap();
    let amp = write_fake_amp(dir.path(), "amp", "  echo \"boom\" >&2\n  exit 3");
    let mut harness = harness(dir.path(), &amp);

    let worker = harness.manager.start_worker("hi").await.unwrap();

    let exited = recv_within(&mut harness.exits, "worker exit").await;
    assert_eq!(exited.status, WorkerStatus::Failed);

    // stderr landed in the same log file.
    let line = recv_within(&mut harness.logs, "stderr line").await;
    assert_eq!(line.content, "boom");
    let _ = worker;
}

#[tokio::test]
async fn stop_kills_a_long_running_worker() {
    let dir = tempfile::tempdir().unwrap();
    let amp = write_fake_amp(dir.path(), "amp", "  sleep 5\n  echo \"done\"\n  exit 0");
    let harness = harness(dir.path(), &amp);

    let worker = harness.manager.start_worker("hi").await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Running);

    let stopped = harness.manager.stop_worker(&worker.id).await.unwrap();
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert!(!harness.manager.has_tailer(&worker.id));

    // The exit monitor observes the kill but must not overwrite the
    // user-driven status.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let reloaded = harness.manager.get_worker(&worker.id).await.unwrap();
    assert_eq!(reloaded.status, WorkerStatus::Stopped);
}

#[tokio::test]
async fn final_conversation_is_journaled_once_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = r#"{"timestamp":"2024-06-01T12:00:00Z","event":{"type":"thread-state","thread":{"id":"T-x","title":"","messages":[{"role":"user","content":[{"type":"text","text":"hi"}]},{"role":"assistant","content":[{"type":"text","text":"hello"}]}]}}}"#;
    let amp = write_fake_amp(
        dir.path(),
        "amp",
        &format!("  echo '{}'\n  echo \"hello\"\n  exit 0", snapshot),
    );
    let mut harness = harness(dir.path(), &amp);

    let worker = harness.manager.start_worker("hi").await.unwrap();
    let _ = recv_within(&mut harness.exits, "worker exit").await;

    let first = recv_within(&mut harness.thread_messages, "first thread message").await;
    assert_eq!(first.content, "hi");
    let second = recv_within(&mut harness.thread_messages, "second thread message").await;
    assert_eq!(second.content, "hello");

    let journaled = harness
        .manager
        .get_thread_messages(&worker.id, 0, 0)
        .unwrap();
    assert_eq!(journaled.len(), 2);
    assert_eq!(harness.manager.count_thread_messages(&worker.id).unwrap(), 2);
}

#[tokio::test]
async fn retry_runs_the_thread_again_and_appends_to_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let amp = simple_amp(dir.path());
    let mut harness = harness(dir.path(), &amp);

    let worker = harness.manager.start_worker("hi").await.unwrap();
    let exited = recv_within(&mut harness.exits, "first exit").await;
    assert_eq!(exited.status, WorkerStatus::Completed);

    let retried = harness.manager.retry_worker(&worker.id, "again").await.unwrap();
    assert_eq!(retried.status, WorkerStatus::Running);
    assert_eq!(retried.id, worker.id);

    let exited = recv_within(&mut harness.exits, "second exit").await;
    assert_eq!(exited.status, WorkerStatus::Completed);

    assert_eq!(
        std::fs::read_to_string(&worker.log_file).unwrap(),
        "hello\nhello\n"
    );
}

#[tokio::test]
async fn retry_rejects_a_running_worker() {
    let dir = tempfile::tempdir().unwrap();
    let amp = write_fake_amp(dir.path(), "amp", "  sleep 5\n  exit 0");
    let harness = harness(dir.path(), &amp);

    let worker = harness.manager.start_worker("hi").await.unwrap();
    let err = harness
        .manager
        .retry_worker(&worker.id, "again")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot retry"));

    harness.manager.stop_worker(&worker.id).await.unwrap();
}

/// Scenario: a pre-connected WebSocket client observes the whole lifecycle
/// of a task created over HTTP.
#[tokio::test]
async fn websocket_client_observes_created_task_lifecycle() {
    use futures_util::StreamExt;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    let dir = tempfile::tempdir().unwrap();
    let amp = simple_amp(dir.path());
    let manager = Arc::new(
        WorkerManager::new(dir.path(), amp.to_str().unwrap()).unwrap(),
    );

    let (hub, hub_handle) = Hub::new();
    tokio::spawn(hub.run());

    let log_hub = hub_handle.clone();
    manager.set_log_callback(Arc::new(move |line| {
        log_hub.broadcast_event(MessageType::Log, Some(line.worker_id.clone()), &line);
    }));
    let exit_hub = hub_handle.clone();
    manager.set_exit_callback(Arc::new(move |worker| {
        exit_hub.broadcast_event(
            MessageType::TaskUpdate,
            Some(worker.id.clone()),
            TaskDto::from(worker),
        );
    }));

    let app = web::app(AppState {
        manager,
        hub: Some(hub_handle),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_app = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, serve_app).await.unwrap();
    });

    let (mut ws, _) = connect_async(format!("ws://{}/api/ws", addr)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tasks")
                .header("content-type", "application/json")
                .body(Body::from(json!({"message": "hi"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let task: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(task["status"], "running");

    // Collect events until the terminal task-update shows up.
    let mut saw_log_hello = false;
    let mut saw_completed = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(saw_log_hello && saw_completed) {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for lifecycle events");
        let frame = tokio::time::timeout(remaining, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("frame error");
        if let Message::Text(text) = frame {
            for part in text.as_str().split('\n') {
                if part.is_empty() {
                    continue;
                }
                let event: Value = serde_json::from_str(part).unwrap();
                match event["type"].as_str() {
                    Some("log") => {
                        if event["data"]["content"] == "hello" {
                            saw_log_hello = true;
                        }
                    }
                    Some("task-update") => {
                        if event["data"]["status"] == "completed" {
                            saw_completed = true;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    let log_file = task["log_file"].as_str().unwrap();
    assert_eq!(std::fs::read_to_string(log_file).unwrap(), "hello\n");
}
