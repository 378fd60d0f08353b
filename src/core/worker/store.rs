use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::error::WorkerError;
use super::types::{ThreadMessage, Worker};

/// The whole worker registry, rewritten on every change. `BTreeMap` keeps
/// key order stable across saves.
pub type WorkerRegistry = BTreeMap<String, Worker>;

/// Flat-file persistence for the worker registry (`workers.json`).
#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
}

impl StateStore {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// Loads the registry. A missing or empty file yields an empty registry;
    /// a file that exists but fails to parse is a fatal error so the daemon
    /// refuses to start on corrupt state.
    pub fn load(&self) -> Result<WorkerRegistry, WorkerError> {
        let data = match std::fs::read(&self.state_file) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WorkerRegistry::new())
            }
            Err(err) => return Err(err.into()),
        };

        if data.is_empty() {
            return Ok(WorkerRegistry::new());
        }

        let registry = serde_json::from_slice(&data)
            .with_context(|| format!("corrupt worker state in {}", self.state_file.display()))?;
        Ok(registry)
    }

    pub fn save(&self, registry: &WorkerRegistry) -> Result<(), WorkerError> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(registry)?;
        std::fs::write(&self.state_file, data)?;
        Ok(())
    }
}

/// JSONL persistence for per-task conversation journals
/// (`threads/thread_<id>.jsonl`).
#[derive(Debug, Clone)]
pub struct ThreadStorage {
    base_dir: PathBuf,
}

impl ThreadStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn thread_file(&self, task_id: &str) -> PathBuf {
        self.base_dir.join(format!("thread_{}.jsonl", task_id))
    }

    pub fn append_message(
        &self,
        task_id: &str,
        message: &ThreadMessage,
    ) -> Result<(), WorkerError> {
        std::fs::create_dir_all(&self.base_dir)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.thread_file(task_id))?;

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    /// Reads up to `limit` messages after skipping `offset` lines.
    /// `limit == 0` means unlimited. Malformed lines are skipped silently.
    pub fn read_messages(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ThreadMessage>, WorkerError> {
        let content = match std::fs::read_to_string(self.thread_file(task_id)) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut messages = Vec::new();
        for line in content.lines().skip(offset) {
            if limit > 0 && messages.len() >= limit {
                break;
            }
            match serde_json::from_str::<ThreadMessage>(line) {
                Ok(message) => messages.push(message),
                Err(_) => continue,
            }
        }
        Ok(messages)
    }

    /// Total line count, malformed lines included, so pagination's
    /// `has_more` stays consistent with what is on disk.
    pub fn count_messages(&self, task_id: &str) -> Result<usize, WorkerError> {
        let content = match std::fs::read_to_string(self.thread_file(task_id)) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        Ok(content.lines().count())
    }

    pub fn delete_thread(&self, task_id: &str) {
        let _ = std::fs::remove_file(self.thread_file(task_id));
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
