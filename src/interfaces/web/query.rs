use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::core::worker::{WorkerError, WorkerStatus};

/// Validated query parameters for the task listing endpoint.
#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub limit: usize,
    pub cursor: Option<String>,
    pub status: Vec<WorkerStatus>,
    pub started_before: Option<DateTime<Utc>>,
    pub started_after: Option<DateTime<Utc>>,
    pub sort_by: String,
    pub sort_order: String,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            cursor: None,
            status: Vec::new(),
            started_before: None,
            started_after: None,
            sort_by: "started".to_string(),
            sort_order: "desc".to_string(),
        }
    }
}

pub fn parse_task_query(params: &HashMap<String, String>) -> Result<TaskQuery, WorkerError> {
    let mut query = TaskQuery::default();

    if let Some(raw) = params.get("limit") {
        let limit: i64 = raw
            .parse()
            .map_err(|_| WorkerError::bad_input("Invalid limit parameter"))?;
        if limit < 1 {
            return Err(WorkerError::bad_input("Limit must be greater than 0"));
        }
        if limit > 100 {
            return Err(WorkerError::bad_input("Limit cannot exceed 100"));
        }
        query.limit = limit as usize;
    }

    if let Some(cursor) = params.get("cursor") {
        if !cursor.is_empty() {
            query.cursor = Some(cursor.clone());
        }
    }

    if let Some(raw) = params.get("status") {
        if !raw.is_empty() {
            for token in raw.split(',') {
                let token = token.trim();
                // The list endpoint only understands the two liveness-backed
                // statuses.
                if token != "running" && token != "stopped" {
                    return Err(WorkerError::bad_input(format!(
                        "Invalid status filter: {}",
                        token
                    )));
                }
                if let Some(status) = WorkerStatus::from_status(token) {
                    query.status.push(status);
                }
            }
        }
    }

    if let Some(raw) = params.get("started_before") {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|_| WorkerError::bad_input("Invalid started_before format, use RFC3339"))?;
        query.started_before = Some(parsed.with_timezone(&Utc));
    }

    if let Some(raw) = params.get("started_after") {
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|_| WorkerError::bad_input("Invalid started_after format, use RFC3339"))?;
        query.started_after = Some(parsed.with_timezone(&Utc));
    }

    if let Some(sort_by) = params.get("sort_by") {
        if !sort_by.is_empty() {
            if sort_by != "started" && sort_by != "status" && sort_by != "id" {
                return Err(WorkerError::bad_input(format!(
                    "Invalid sort_by parameter: {}",
                    sort_by
                )));
            }
            query.sort_by = sort_by.clone();
        }
    }

    if let Some(sort_order) = params.get("sort_order") {
        if !sort_order.is_empty() {
            if sort_order != "asc" && sort_order != "desc" {
                return Err(WorkerError::bad_input(format!(
                    "Invalid sort_order parameter: {}",
                    sort_order
                )));
            }
            query.sort_order = sort_order.clone();
        }
    }

    Ok(query)
}

/// Opaque pagination token: `<unix_seconds>_<id>`.
pub fn generate_cursor(id: &str, started: DateTime<Utc>) -> String {
    format!("{}_{}", started.timestamp(), id)
}

pub fn parse_cursor(cursor: &str) -> Result<(DateTime<Utc>, String), WorkerError> {
    let (raw_timestamp, id) = cursor
        .split_once('_')
        .ok_or_else(|| WorkerError::bad_input("Invalid cursor format"))?;

    let timestamp: i64 = raw_timestamp
        .parse()
        .map_err(|_| WorkerError::bad_input("Invalid cursor timestamp"))?;
    let started = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| WorkerError::bad_input("Invalid cursor timestamp"))?;

    Ok((started, id.to_string()))
}
