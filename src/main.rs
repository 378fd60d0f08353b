use std::sync::Arc;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ampd::config::Config;
use ampd::core::hub::{Hub, MessageType};
use ampd::core::worker::WorkerManager;
use ampd::interfaces::web::{self, AppState, TaskDto};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let config = Config::from_env();
    let port: u16 = config
        .port
        .parse()
        .with_context(|| format!("invalid PORT value: {}", config.port))?;

    let manager = Arc::new(
        WorkerManager::new(&config.log_dir, &config.amp_binary)
            .context("failed to initialize worker state")?,
    );

    let (hub, hub_handle) = Hub::new();
    tokio::spawn(hub.run());

    let log_hub = hub_handle.clone();
    manager.set_log_callback(Arc::new(move |line| {
        log_hub.broadcast_event(MessageType::Log, Some(line.worker_id.clone()), &line);
    }));

    let thread_hub = hub_handle.clone();
    manager.set_thread_message_callback(Arc::new(move |worker_id, message| {
        thread_hub.broadcast_event(
            MessageType::ThreadMessage,
            Some(worker_id.to_string()),
            message,
        );
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

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;
    info!("ampd listening on 0.0.0.0:{}", port);

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
