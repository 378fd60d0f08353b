use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;

use super::super::error::ApiError;
use super::super::AppState;

/// Serves the worker's raw log file as plain text. `?tail=n` limits the
/// body to the last n lines.
pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let worker = state.manager.get_worker(&id).await?;

    let tail = match params.get("tail") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ApiError::bad_request("Invalid tail parameter"))?,
        None => 0,
    };

    let content = match tokio::fs::read_to_string(&worker.log_file).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Log file not found"))
        }
        Err(err) => return Err(ApiError::from(crate::core::worker::WorkerError::from(err))),
    };

    let lines: Vec<&str> = content.lines().collect();
    let selected = if tail > 0 && lines.len() > tail {
        &lines[lines.len() - tail..]
    } else {
        &lines[..]
    };

    let mut body = String::new();
    for line in selected {
        body.push_str(line);
        body.push('\n');
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    ))
}
