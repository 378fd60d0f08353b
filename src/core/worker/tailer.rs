use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use super::error::WorkerError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single observed log line. Ephemeral; the log file itself is the source
/// of truth.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

pub type LogCallback = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Follows an append-only log file and delivers each complete new line to a
/// callback. Tolerates the file not existing yet, truncation, and rotation.
pub struct LogTailer {
    path: PathBuf,
    worker_id: String,
    callback: LogCallback,
    cancel: CancellationToken,
    follower: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>, worker_id: impl Into<String>, callback: LogCallback) -> Self {
        Self {
            path: path.into(),
            worker_id: worker_id.into(),
            callback,
            cancel: CancellationToken::new(),
            follower: std::sync::Mutex::new(None),
        }
    }

    /// Launches the background follower. Non-blocking; creates the log
    /// directory if it does not exist yet.
    pub fn start(&self) -> Result<(), WorkerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut follower = Follower {
            path: self.path.clone(),
            worker_id: self.worker_id.clone(),
            callback: self.callback.clone(),
            offset: 0,
        };
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // One last pass so lines flushed just before the
                        // process exited are still delivered.
                        follower.poll().await;
                        return;
                    }
                    _ = ticker.tick() => {
                        follower.poll().await;
                    }
                }
            }
        });
        *self.follower.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Cancels the follower and waits for its final drain pass, so the file
    /// handle is released and every flushed line has been delivered when
    /// this returns. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.follower.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct Follower {
    path: PathBuf,
    worker_id: String,
    callback: LogCallback,
    offset: u64,
}

impl Follower {
    async fn poll(&mut self) {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // File not created yet (or removed mid-rotation); wait.
            Err(_) => return,
        };

        // Shrinking file means truncation or rotation: new epoch from zero.
        if meta.len() < self.offset {
            self.offset = 0;
        }
        if meta.len() == self.offset {
            return;
        }

        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(_) => return,
        };
        if file.seek(SeekFrom::Start(self.offset)).await.is_err() {
            return;
        }

        let mut buf = Vec::new();
        if file.read_to_end(&mut buf).await.is_err() {
            return;
        }

        // Only consume up to the last newline; a partial trailing line stays
        // unread until its terminator arrives.
        let consumed = match buf.iter().rposition(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => return,
        };

        for raw in buf[..consumed].split(|&b| b == b'\n') {
            let raw = match raw.last() {
                Some(b'\r') => &raw[..raw.len() - 1],
                _ => raw,
            };
            if raw.is_empty() {
                continue;
            }
            (self.callback)(LogLine {
                worker_id: self.worker_id.clone(),
                timestamp: Utc::now(),
                content: String::from_utf8_lossy(raw).into_owned(),
            });
        }

        self.offset += consumed as u64;
    }
}
