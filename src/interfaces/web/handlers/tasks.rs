use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::core::hub::MessageType;
use crate::core::worker::MetadataPatch;

use super::super::dto::{
    PaginatedTasksResponse, PatchTaskRequest, StartTaskRequest, TaskDto,
};
use super::super::error::ApiError;
use super::super::query::{generate_cursor, parse_cursor, parse_task_query};
use super::super::AppState;

/// Broadcasts a `task-update` event for the given task. A missing hub (test
/// contexts) makes this a no-op.
fn broadcast_task_update(state: &AppState, task: &TaskDto) {
    if let Some(hub) = &state.hub {
        hub.broadcast_event(MessageType::TaskUpdate, Some(task.id.clone()), task);
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<PaginatedTasksResponse>, ApiError> {
    let query = parse_task_query(&params)?;

    let workers = state
        .manager
        .list_workers_filtered(
            &query.status,
            query.started_before,
            query.started_after,
            &query.sort_by,
            &query.sort_order,
        )
        .await?;

    let mut start_index = 0;
    if let Some(cursor) = &query.cursor {
        let (cursor_time, cursor_id) = parse_cursor(cursor)?;
        for (index, worker) in workers.iter().enumerate() {
            if worker.started == cursor_time && worker.id == cursor_id {
                start_index = index + 1;
                break;
            }
            // The cursor timestamp is truncated to seconds, so the exact
            // match rarely fires; the page boundary is found by passing it.
            let passed = if query.sort_order == "asc" {
                worker.started > cursor_time
            } else {
                worker.started < cursor_time
            };
            if passed {
                start_index = index;
                break;
            }
        }
    }

    let end_index = (start_index + query.limit).min(workers.len());
    let page = &workers[start_index..end_index];

    let tasks: Vec<TaskDto> = page.iter().map(TaskDto::from).collect();
    let has_more = end_index < workers.len();
    let next_cursor = match (has_more, page.last()) {
        (true, Some(last)) => Some(generate_cursor(&last.id, last.started)),
        _ => None,
    };

    Ok(Json(PaginatedTasksResponse {
        tasks,
        next_cursor,
        has_more,
        total: workers.len(),
    }))
}

pub async fn start_task(
    State(state): State<AppState>,
    Json(request): Json<StartTaskRequest>,
) -> Result<(StatusCode, Json<TaskDto>), ApiError> {
    if request.message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    let worker = state.manager.start_worker(&request.message).await?;
    let task = TaskDto::from(&worker);
    broadcast_task_update(&state, &task);

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn stop_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let worker = state.manager.stop_worker(&id).await?;
    broadcast_task_update(&state, &TaskDto::from(&worker));
    Ok(StatusCode::ACCEPTED)
}

pub async fn continue_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StartTaskRequest>,
) -> Result<StatusCode, ApiError> {
    if request.message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    state.manager.continue_worker(&id, &request.message).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn interrupt_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let worker = state.manager.interrupt_worker(&id).await?;
    broadcast_task_update(&state, &TaskDto::from(&worker));
    Ok(StatusCode::ACCEPTED)
}

pub async fn abort_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let worker = state.manager.abort_worker(&id).await?;
    broadcast_task_update(&state, &TaskDto::from(&worker));
    Ok(StatusCode::ACCEPTED)
}

pub async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StartTaskRequest>,
) -> Result<StatusCode, ApiError> {
    if request.message.is_empty() {
        return Err(ApiError::bad_request("Message is required"));
    }

    let worker = state.manager.retry_worker(&id, &request.message).await?;
    broadcast_task_update(&state, &TaskDto::from(&worker));
    Ok(StatusCode::ACCEPTED)
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PatchTaskRequest>,
) -> Result<Json<TaskDto>, ApiError> {
    if let Some(priority) = &request.priority {
        if priority != "low" && priority != "medium" && priority != "high" {
            return Err(ApiError::bad_request(format!(
                "Invalid priority: {}",
                priority
            )));
        }
    }

    let worker = state
        .manager
        .update_metadata(
            &id,
            MetadataPatch {
                title: request.title,
                description: request.description,
                priority: request.priority,
                tags: request.tags,
            },
        )
        .await?;

    let task = TaskDto::from(&worker);
    broadcast_task_update(&state, &task);
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete_worker(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
