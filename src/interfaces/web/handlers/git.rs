use axum::extract::Path;
use axum::http::StatusCode;

// Git integration is not wired up yet; these endpoints acknowledge the
// request so clients can build against the final surface.

pub async fn merge_task(Path(id): Path<String>) -> (StatusCode, String) {
    (
        StatusCode::ACCEPTED,
        format!("TODO: merge branch for task {}", id),
    )
}

pub async fn delete_branch(Path(id): Path<String>) -> (StatusCode, String) {
    (
        StatusCode::ACCEPTED,
        format!("TODO: delete branch for task {}", id),
    )
}

pub async fn create_pr(Path(id): Path<String>) -> (StatusCode, String) {
    (
        StatusCode::ACCEPTED,
        format!("TODO: create pull request for task {}", id),
    )
}
