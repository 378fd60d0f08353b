use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::WorkerError;
use super::parser::{AmpLogParser, ThreadMessageSink};
use super::store::{StateStore, ThreadStorage};
use super::tailer::{LogCallback, LogLine, LogTailer};
use super::types::{can_transition, ThreadMessage, Worker, WorkerStatus};

pub type LogLineCallback = Arc<dyn Fn(LogLine) + Send + Sync>;
pub type ThreadMessageCallback = Arc<dyn Fn(&str, &ThreadMessage) + Send + Sync>;
pub type WorkerExitCallback = Arc<dyn Fn(&Worker) + Send + Sync>;

/// Presence-typed metadata update. `None` leaves a field untouched;
/// `tags: Some(vec![])` clears the tag list.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Single owner of the worker registry and of per-worker runtime handles
/// (log tailer, conversation parser). All registry mutations run under one
/// lock as load-mutate-persist cycles.
pub struct WorkerManager {
    log_dir: PathBuf,
    amp_binary: String,
    store: StateStore,
    threads: ThreadStorage,
    state_mu: Mutex<()>,
    tailers: StdMutex<HashMap<String, LogTailer>>,
    parsers: StdMutex<HashMap<String, Arc<StdMutex<AmpLogParser>>>>,
    on_log_line: RwLock<Option<LogLineCallback>>,
    on_thread_message: RwLock<Option<ThreadMessageCallback>>,
    on_worker_exit: RwLock<Option<WorkerExitCallback>>,
}

impl WorkerManager {
    /// Creates the manager and verifies the persisted state is readable.
    /// Corrupt state is a startup failure, not something to limp past.
    pub fn new(log_dir: impl Into<PathBuf>, amp_binary: impl Into<String>) -> Result<Self, WorkerError> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;

        let store = StateStore::new(log_dir.join("workers.json"));
        store.load()?;

        Ok(Self {
            threads: ThreadStorage::new(log_dir.join("threads")),
            store,
            log_dir,
            amp_binary: amp_binary.into(),
            state_mu: Mutex::new(()),
            tailers: StdMutex::new(HashMap::new()),
            parsers: StdMutex::new(HashMap::new()),
            on_log_line: RwLock::new(None),
            on_thread_message: RwLock::new(None),
            on_worker_exit: RwLock::new(None),
        })
    }

    /// Callbacks are wired once at startup, before any worker is spawned.
    pub fn set_log_callback(&self, callback: LogLineCallback) {
        *self.on_log_line.write().unwrap() = Some(callback);
    }

    pub fn set_thread_message_callback(&self, callback: ThreadMessageCallback) {
        *self.on_thread_message.write().unwrap() = Some(callback);
    }

    pub fn set_exit_callback(&self, callback: WorkerExitCallback) {
        *self.on_worker_exit.write().unwrap() = Some(callback);
    }

    /// Creates a fresh thread, spawns the worker pipeline in its own process
    /// group with stdout+stderr redirected to the worker log, registers it
    /// `running`, and starts the tailer and exit monitor.
    pub async fn start_worker(self: &Arc<Self>, message: &str) -> Result<Worker, WorkerError> {
        let thread_id = self.create_thread().await?;
        let worker_id = short_id();
        let log_file = self.log_dir.join(format!("worker-{}.log", worker_id));

        let log_handle = std::fs::File::create(&log_file)?;
        let mut child = self.spawn_pipeline(message, &thread_id, &log_handle)?;
        let pid = child.id().map(|pid| pid as i32).unwrap_or(-1);

        let worker = Worker {
            id: worker_id.clone(),
            thread_id,
            pid,
            log_file: log_file.display().to_string(),
            started: Utc::now(),
            status: WorkerStatus::Running,
            title: None,
            description: None,
            tags: Vec::new(),
            priority: None,
        };

        {
            let _guard = self.state_mu.lock().await;
            let mut registry = self.store.load()?;
            registry.insert(worker.id.clone(), worker.clone());
            if let Err(err) = self.store.save(&registry) {
                // Half-created worker: kill the child rather than leak it.
                let _ = child.start_kill();
                return Err(err);
            }
        }

        self.start_runtime(&worker);
        self.monitor_exit(worker.id.clone(), child);

        info!("started worker {} (pid {})", worker.id, worker.pid);
        Ok(worker)
    }

    /// Stops a running worker with SIGTERM to its process group.
    pub async fn stop_worker(&self, worker_id: &str) -> Result<Worker, WorkerError> {
        let worker = {
            let _guard = self.state_mu.lock().await;
            let mut registry = self.store.load()?;
            let worker = registry
                .get_mut(worker_id)
                .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

            if worker.status != WorkerStatus::Running {
                return Err(WorkerError::conflict(format!(
                    "worker {} is not running",
                    worker_id
                )));
            }

            terminate_process_tree(worker.pid);
            worker.status = WorkerStatus::Stopped;
            let snapshot = worker.clone();
            self.store.save(&registry)?;
            snapshot
        };

        self.kill_leftover_amp(&worker.thread_id);
        self.stop_tailer(worker_id).await;

        info!("stopped worker {}", worker_id);
        Ok(worker)
    }

    /// Sends a follow-up message to the worker's thread. Synchronous: the
    /// short-lived child appends its output to the existing log file.
    pub async fn continue_worker(&self, worker_id: &str, message: &str) -> Result<(), WorkerError> {
        let (thread_id, log_file) = {
            let _guard = self.state_mu.lock().await;
            let mut registry = self.store.load()?;
            let worker = registry
                .get_mut(worker_id)
                .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

            let status = worker.status;
            let details = (worker.thread_id.clone(), worker.log_file.clone());

            // A worker recorded running may have died without the exit
            // monitor firing (daemon restart); demote it before rejecting.
            if status == WorkerStatus::Running && !process_alive(worker.pid) {
                worker.status = WorkerStatus::Stopped;
                if let Err(err) = self.store.save(&registry) {
                    warn!("failed to persist demoted worker {}: {}", worker_id, err);
                }
                return Err(WorkerError::conflict(format!(
                    "worker {} is not running",
                    worker_id
                )));
            }

            if status != WorkerStatus::Running {
                return Err(WorkerError::conflict(format!(
                    "worker {} is not running",
                    worker_id
                )));
            }

            details
        };

        let log_handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;

        let status = self
            .pipeline_command(message, &thread_id, &log_handle, false)?
            .status()
            .await
            .context("failed to run continue pipeline")?;

        if !status.success() {
            return Err(WorkerError::internal(format!(
                "continue command exited with status {}",
                status
            )));
        }
        Ok(())
    }

    /// Interrupts the worker's process group with SIGINT. The signal is best
    /// effort; the status transition persists either way.
    pub async fn interrupt_worker(&self, worker_id: &str) -> Result<Worker, WorkerError> {
        let _guard = self.state_mu.lock().await;
        let mut registry = self.store.load()?;
        let worker = registry
            .get_mut(worker_id)
            .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

        if !can_transition(worker.status, WorkerStatus::Interrupted) {
            return Err(WorkerError::conflict(format!(
                "cannot interrupt worker {} with status {}",
                worker_id, worker.status
            )));
        }

        signal_process_tree(worker.pid, UnixSignal::Interrupt);
        worker.status = WorkerStatus::Interrupted;
        let snapshot = worker.clone();
        self.store.save(&registry)?;
        Ok(snapshot)
    }

    /// Forcefully terminates the worker's process group with SIGKILL.
    pub async fn abort_worker(&self, worker_id: &str) -> Result<Worker, WorkerError> {
        let worker = {
            let _guard = self.state_mu.lock().await;
            let mut registry = self.store.load()?;
            let worker = registry
                .get_mut(worker_id)
                .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

            if !can_transition(worker.status, WorkerStatus::Aborted) {
                return Err(WorkerError::conflict(format!(
                    "cannot abort worker {} with status {}",
                    worker_id, worker.status
                )));
            }

            signal_process_tree(worker.pid, UnixSignal::Kill);
            worker.status = WorkerStatus::Aborted;
            let snapshot = worker.clone();
            self.store.save(&registry)?;
            snapshot
        };

        self.kill_leftover_amp(&worker.thread_id);
        self.stop_tailer(worker_id).await;
        Ok(worker)
    }

    /// Spawns a new pipeline against the existing thread, appending to the
    /// same log file, and puts the worker back into `running`.
    pub async fn retry_worker(
        self: &Arc<Self>,
        worker_id: &str,
        message: &str,
    ) -> Result<Worker, WorkerError> {
        let (worker, child) = {
            let _guard = self.state_mu.lock().await;
            let mut registry = self.store.load()?;
            let worker = registry
                .get_mut(worker_id)
                .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

            if !can_transition(worker.status, WorkerStatus::Running) {
                return Err(WorkerError::conflict(format!(
                    "cannot retry worker {} with status {}",
                    worker_id, worker.status
                )));
            }
            if worker.status == WorkerStatus::Running {
                self.kill_leftover_amp(&worker.thread_id);
            }

            let log_handle = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&worker.log_file)?;
            let mut child = self.spawn_pipeline(message, &worker.thread_id, &log_handle)?;

            worker.pid = child.id().map(|pid| pid as i32).unwrap_or(-1);
            worker.status = WorkerStatus::Running;
            let snapshot = worker.clone();
            if let Err(err) = self.store.save(&registry) {
                let _ = child.start_kill();
                return Err(err);
            }
            (snapshot, child)
        };

        // Runtime before exit monitor, so a fast exit still finds the tailer
        // and parser to finalize.
        self.start_runtime(&worker);
        self.monitor_exit(worker.id.clone(), child);
        info!("retried worker {} (pid {})", worker.id, worker.pid);
        Ok(worker)
    }

    /// Applies the fields present in the patch; absent fields are untouched.
    pub async fn update_metadata(
        &self,
        worker_id: &str,
        patch: MetadataPatch,
    ) -> Result<Worker, WorkerError> {
        let _guard = self.state_mu.lock().await;
        let mut registry = self.store.load()?;
        let worker = registry
            .get_mut(worker_id)
            .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

        if let Some(title) = patch.title {
            worker.title = non_empty(title);
        }
        if let Some(description) = patch.description {
            worker.description = non_empty(description);
        }
        if let Some(priority) = patch.priority {
            worker.priority = non_empty(priority);
        }
        if let Some(tags) = patch.tags {
            worker.tags = tags;
        }

        let snapshot = worker.clone();
        self.store.save(&registry)?;
        Ok(snapshot)
    }

    /// Removes a worker: kills it if running, then drops the registry entry
    /// and its files (log removal is best effort).
    pub async fn delete_worker(&self, worker_id: &str) -> Result<(), WorkerError> {
        let worker = {
            let _guard = self.state_mu.lock().await;
            let mut registry = self.store.load()?;
            let worker = registry
                .remove(worker_id)
                .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;

            if worker.status == WorkerStatus::Running {
                terminate_process_tree(worker.pid);
            }
            self.store.save(&registry)?;
            worker
        };

        if worker.status == WorkerStatus::Running {
            self.kill_leftover_amp(&worker.thread_id);
        }
        self.stop_tailer(worker_id).await;
        self.parsers.lock().unwrap().remove(worker_id);

        let _ = std::fs::remove_file(&worker.log_file);
        self.threads.delete_thread(worker_id);

        info!("deleted worker {}", worker_id);
        Ok(())
    }

    /// Returns all workers, lazily demoting `running` entries whose process
    /// is gone. The registry is rewritten at most once per pass.
    pub async fn list_workers(&self) -> Result<Vec<Worker>, WorkerError> {
        let _guard = self.state_mu.lock().await;
        let mut registry = self.store.load()?;

        let mut updated = false;
        for worker in registry.values_mut() {
            if worker.status == WorkerStatus::Running && !process_alive(worker.pid) {
                worker.status = WorkerStatus::Stopped;
                updated = true;
            }
        }
        if updated {
            if let Err(err) = self.store.save(&registry) {
                warn!("failed to persist reconciled statuses: {}", err);
            }
        }

        Ok(registry.into_values().collect())
    }

    /// `list_workers` plus status/time filtering and sorting.
    pub async fn list_workers_filtered(
        &self,
        status: &[WorkerStatus],
        started_before: Option<DateTime<Utc>>,
        started_after: Option<DateTime<Utc>>,
        sort_by: &str,
        sort_order: &str,
    ) -> Result<Vec<Worker>, WorkerError> {
        let mut workers = self.list_workers().await?;

        if !status.is_empty() {
            workers.retain(|worker| status.contains(&worker.status));
        }
        if let Some(before) = started_before {
            workers.retain(|worker| worker.started <= before);
        }
        if let Some(after) = started_after {
            workers.retain(|worker| worker.started >= after);
        }

        match sort_by {
            "id" => workers.sort_by(|a, b| a.id.cmp(&b.id)),
            "status" => workers.sort_by(|a, b| a.status.as_str().cmp(b.status.as_str())),
            _ => workers.sort_by(|a, b| a.started.cmp(&b.started)),
        }
        if sort_order != "asc" {
            workers.reverse();
        }

        Ok(workers)
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Worker, WorkerError> {
        let _guard = self.state_mu.lock().await;
        let registry = self.store.load()?;
        registry
            .get(worker_id)
            .cloned()
            .ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))
    }

    pub fn get_thread_messages(
        &self,
        worker_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ThreadMessage>, WorkerError> {
        self.threads.read_messages(worker_id, limit, offset)
    }

    pub fn count_thread_messages(&self, worker_id: &str) -> Result<usize, WorkerError> {
        self.threads.count_messages(worker_id)
    }

    /// True while a tailer is registered for the worker.
    pub fn has_tailer(&self, worker_id: &str) -> bool {
        self.tailers.lock().unwrap().contains_key(worker_id)
    }

    async fn create_thread(&self) -> Result<String, WorkerError> {
        let output = tokio::process::Command::new(&self.amp_binary)
            .args(["threads", "new"])
            .output()
            .await
            .context("failed to invoke amp for thread creation")?;

        if !output.status.success() {
            return Err(WorkerError::internal(format!(
                "thread creation exited with status {}",
                output.status
            )));
        }

        let thread_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !thread_id.starts_with("T-") {
            return Err(WorkerError::internal(format!(
                "unexpected thread id format: {}",
                thread_id
            )));
        }
        Ok(thread_id)
    }

    fn pipeline_command(
        &self,
        message: &str,
        thread_id: &str,
        log_handle: &std::fs::File,
        new_process_group: bool,
    ) -> Result<tokio::process::Command, WorkerError> {
        let script = format!(
            "echo {} | {} threads continue {}",
            shell_quote(message),
            shell_quote(&self.amp_binary),
            shell_quote(thread_id),
        );

        let mut command = std::process::Command::new("bash");
        command.arg("-c").arg(script);
        command.stdin(Stdio::null());
        command.stdout(Stdio::from(log_handle.try_clone()?));
        command.stderr(Stdio::from(log_handle.try_clone()?));

        #[cfg(unix)]
        if new_process_group {
            use std::os::unix::process::CommandExt;
            // Own process group so signals reach the whole pipeline.
            command.process_group(0);
        }

        Ok(tokio::process::Command::from(command))
    }

    fn spawn_pipeline(
        &self,
        message: &str,
        thread_id: &str,
        log_handle: &std::fs::File,
    ) -> Result<tokio::process::Child, WorkerError> {
        let child = self
            .pipeline_command(message, thread_id, log_handle, true)?
            .spawn()
            .context("failed to spawn worker pipeline")?;
        Ok(child)
    }

    fn start_runtime(&self, worker: &Worker) {
        let sink = self.thread_message_sink(worker.id.clone());
        let parser = Arc::new(StdMutex::new(AmpLogParser::new(sink)));
        self.parsers
            .lock()
            .unwrap()
            .insert(worker.id.clone(), parser.clone());

        let on_log = self.on_log_line.read().unwrap().clone();
        let callback: LogCallback = Arc::new(move |line: LogLine| {
            if let Some(on_log) = &on_log {
                on_log(line.clone());
            }
            if let Ok(mut parser) = parser.lock() {
                parser.parse_line(&line.content);
            }
        });

        let tailer = LogTailer::new(&worker.log_file, &worker.id, callback);
        match tailer.start() {
            Ok(()) => {
                self.tailers.lock().unwrap().insert(worker.id.clone(), tailer);
            }
            Err(err) => warn!("failed to start tailer for worker {}: {}", worker.id, err),
        }
    }

    fn thread_message_sink(&self, worker_id: String) -> ThreadMessageSink {
        let threads = self.threads.clone();
        let on_message = self.on_thread_message.read().unwrap().clone();
        Arc::new(move |message: ThreadMessage| {
            if let Err(err) = threads.append_message(&worker_id, &message) {
                warn!("failed to journal thread message for {}: {}", worker_id, err);
            }
            if let Some(on_message) = &on_message {
                on_message(&worker_id, &message);
            }
        })
    }

    fn monitor_exit(self: &Arc<Self>, worker_id: String, mut child: tokio::process::Child) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            let exited_ok = status.as_ref().map(|s| s.success()).unwrap_or(false);
            match &status {
                Ok(status) => info!("worker {} exited with {}", worker_id, status),
                Err(err) => warn!("failed waiting on worker {}: {}", worker_id, err),
            }
            manager.handle_worker_exit(&worker_id, exited_ok).await;
        });
    }

    async fn handle_worker_exit(&self, worker_id: &str, exited_ok: bool) {
        let snapshot = {
            let _guard = self.state_mu.lock().await;
            match self.store.load() {
                Ok(mut registry) => match registry.get_mut(worker_id) {
                    // Only a still-running worker takes the terminal status;
                    // a user-driven stop/abort that raced the exit wins.
                    Some(worker) if worker.status == WorkerStatus::Running => {
                        worker.status = if exited_ok {
                            WorkerStatus::Completed
                        } else {
                            WorkerStatus::Failed
                        };
                        let snapshot = worker.clone();
                        if let Err(err) = self.store.save(&registry) {
                            warn!("failed to persist exit of worker {}: {}", worker_id, err);
                        }
                        Some(snapshot)
                    }
                    _ => None,
                },
                Err(err) => {
                    warn!("failed to load registry after worker {} exit: {}", worker_id, err);
                    None
                }
            }
        };

        // Drains remaining log lines before the parser finalizes.
        self.stop_tailer(worker_id).await;

        if let Some(worker) = &snapshot {
            let callback = self.on_worker_exit.read().unwrap().clone();
            if let Some(callback) = callback {
                callback(worker);
            }
        }

        // Thread messages trail the terminal task-update on purpose.
        let parser = self.parsers.lock().unwrap().remove(worker_id);
        if let Some(parser) = parser {
            if let Ok(mut parser) = parser.lock() {
                parser.process_final_conversation();
            }
        }
    }

    async fn stop_tailer(&self, worker_id: &str) {
        let tailer = self.tailers.lock().unwrap().remove(worker_id);
        if let Some(tailer) = tailer {
            tailer.stop().await;
        }
    }

    /// Best-effort cleanup of assistant processes still attached to the
    /// thread after the shell pipeline is gone.
    fn kill_leftover_amp(&self, thread_id: &str) {
        let pattern = format!("{} threads continue {}", self.amp_binary, thread_id);
        let _ = std::process::Command::new("pkill")
            .arg("-f")
            .arg(pattern)
            .status();
    }
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn shell_quote(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

enum UnixSignal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    pid > 0 && kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

/// SIGTERM to the process group, falling back to the single pid, then
/// SIGKILL. Failures are tolerated: the child may already be gone.
#[cfg(unix)]
fn terminate_process_tree(pid: i32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    if pid <= 0 {
        return;
    }
    let target = Pid::from_raw(pid);
    if killpg(target, Signal::SIGTERM).is_ok() {
        return;
    }
    if kill(target, Signal::SIGTERM).is_err() {
        let _ = kill(target, Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_process_tree(_pid: i32) {}

#[cfg(unix)]
fn signal_process_tree(pid: i32, signal: UnixSignal) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    if pid <= 0 {
        return;
    }
    let signal = match signal {
        UnixSignal::Interrupt => Signal::SIGINT,
        UnixSignal::Kill => Signal::SIGKILL,
    };
    let target = Pid::from_raw(pid);
    if killpg(target, signal).is_err() {
        let _ = kill(target, signal);
    }
}

#[cfg(not(unix))]
fn signal_process_tree(_pid: i32, _signal: UnixSignal) {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::super::types::{Worker, WorkerStatus};
    use super::{shell_quote, short_id, MetadataPatch, WorkerManager};

    fn seeded_manager(workers: Vec<Worker>) -> (tempfile::TempDir, Arc<WorkerManager>) {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkerManager::new(dir.path(), "amp").unwrap();
        let mut registry = super::super::store::WorkerRegistry::new();
        for worker in workers {
            registry.insert(worker.id.clone(), worker);
        }
        manager.store.save(&registry).unwrap();
        (dir, Arc::new(manager))
    }

    fn worker(id: &str, status: WorkerStatus, hours_ago: i64) -> Worker {
        Worker {
            id: id.to_string(),
            thread_id: format!("T-{}", id),
            pid: 0,
            log_file: format!("/tmp/worker-{}.log", id),
            started: Utc::now() - Duration::hours(hours_ago),
            status,
            title: None,
            description: None,
            tags: Vec::new(),
            priority: None,
        }
    }

    #[test]
    fn short_ids_are_eight_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[tokio::test]
    async fn stop_rejects_unknown_and_non_running_workers() {
        let (_dir, manager) =
            seeded_manager(vec![worker("stopped1", WorkerStatus::Stopped, 1)]);

        let err = manager.stop_worker("missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = manager.stop_worker("stopped1").await.unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn interrupt_requires_a_legal_transition() {
        let (_dir, manager) =
            seeded_manager(vec![worker("done1", WorkerStatus::Completed, 1)]);

        let err = manager.interrupt_worker("done1").await.unwrap_err();
        assert!(err.to_string().contains("cannot interrupt"));
    }

    #[tokio::test]
    async fn list_demotes_running_workers_whose_process_is_gone() {
        let mut dead = worker("ghost1", WorkerStatus::Running, 1);
        dead.pid = 999_999_99;
        let (_dir, manager) = seeded_manager(vec![dead]);

        let workers = manager.list_workers().await.unwrap();
        assert_eq!(workers[0].status, WorkerStatus::Stopped);

        // The demotion was persisted.
        let reloaded = manager.store.load().unwrap();
        assert_eq!(reloaded["ghost1"].status, WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn metadata_patch_only_touches_present_fields() {
        let mut seeded = worker("meta1", WorkerStatus::Stopped, 1);
        seeded.title = Some("old title".to_string());
        seeded.tags = vec!["keep".to_string()];
        let (_dir, manager) = seeded_manager(vec![seeded]);

        let updated = manager
            .update_metadata(
                "meta1",
                MetadataPatch {
                    description: Some("new description".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title.as_deref(), Some("old title"));
        assert_eq!(updated.description.as_deref(), Some("new description"));
        assert_eq!(updated.tags, vec!["keep".to_string()]);

        let cleared = manager
            .update_metadata(
                "meta1",
                MetadataPatch {
                    tags: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.tags.is_empty());
    }

    #[tokio::test]
    async fn filtered_listing_sorts_and_filters() {
        let (_dir, manager) = seeded_manager(vec![
            worker("w1", WorkerStatus::Stopped, 3),
            worker("w2", WorkerStatus::Stopped, 2),
            worker("w3", WorkerStatus::Aborted, 1),
        ]);

        let newest_first = manager
            .list_workers_filtered(&[], None, None, "started", "desc")
            .await
            .unwrap();
        let ids: Vec<&str> = newest_first.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["w3", "w2", "w1"]);

        let stopped_only = manager
            .list_workers_filtered(&[WorkerStatus::Stopped], None, None, "id", "asc")
            .await
            .unwrap();
        let ids: Vec<&str> = stopped_only.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w2"]);

        let cutoff = Utc::now() - Duration::minutes(90);
        let recent = manager
            .list_workers_filtered(&[], None, Some(cutoff), "started", "asc")
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "w3");
    }

    #[tokio::test]
    async fn delete_removes_registry_entry_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkerManager::new(dir.path(), "amp").unwrap();

        let log_path = dir.path().join("worker-del1.log");
        std::fs::write(&log_path, "output\n").unwrap();

        let mut target = worker("del1", WorkerStatus::Stopped, 1);
        target.log_file = log_path.display().to_string();
        let mut registry = super::super::store::WorkerRegistry::new();
        registry.insert(target.id.clone(), target);
        manager.store.save(&registry).unwrap();

        Arc::new(manager).delete_worker("del1").await.unwrap();

        let dir_store = super::StateStore::new(dir.path().join("workers.json"));
        assert!(dir_store.load().unwrap().is_empty());
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn manager_refuses_to_start_on_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workers.json"), "{broken").unwrap();
        assert!(WorkerManager::new(dir.path(), "amp").is_err());
    }
}
