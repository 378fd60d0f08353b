use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers::{git, logs, tasks, thread, ws};
use super::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::start_task))
        .route(
            "/api/tasks/{id}",
            patch(tasks::update_task).delete(tasks::delete_task),
        )
        .route("/api/tasks/{id}/stop", post(tasks::stop_task))
        .route("/api/tasks/{id}/continue", post(tasks::continue_task))
        .route("/api/tasks/{id}/interrupt", post(tasks::interrupt_task))
        .route("/api/tasks/{id}/abort", post(tasks::abort_task))
        .route("/api/tasks/{id}/retry", post(tasks::retry_task))
        .route("/api/tasks/{id}/logs", get(logs::get_task_logs))
        .route("/api/tasks/{id}/thread", get(thread::get_task_thread))
        .route("/api/tasks/{id}/merge", post(git::merge_task))
        .route("/api/tasks/{id}/delete-branch", post(git::delete_branch))
        .route("/api/tasks/{id}/create-pr", post(git::create_pr))
        .route("/api/ws", get(ws::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
