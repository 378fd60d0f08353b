use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;

use super::super::dto::{PaginatedThreadResponse, ThreadMessageDto};
use super::super::error::ApiError;
use super::super::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 100;

/// Returns the reconstructed conversation for a task, oldest first.
/// Unparseable pagination values fall back to the defaults.
pub async fn get_task_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PaginatedThreadResponse>, ApiError> {
    let limit = params
        .get("limit")
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .map(|limit| limit.min(MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);

    let offset = params
        .get("offset")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(0);

    let total = state.manager.count_thread_messages(&id)?;
    let messages = state.manager.get_thread_messages(&id, limit, offset)?;

    let has_more = offset + messages.len() < total;
    let messages: Vec<ThreadMessageDto> = messages.iter().map(ThreadMessageDto::from).collect();

    Ok(Json(PaginatedThreadResponse {
        messages,
        has_more,
        total,
    }))
}
