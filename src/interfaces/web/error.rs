use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::core::worker::WorkerError;

/// HTTP-shaped error: a status code plus a plain-text body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::BadInput(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            WorkerError::NotFound(_) => Self {
                status: StatusCode::NOT_FOUND,
                message: "Task not found".to_string(),
            },
            WorkerError::Conflict(message) => Self {
                status: StatusCode::CONFLICT,
                message,
            },
            WorkerError::Internal(err) => {
                error!("internal error: {:#}", err);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal server error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
