use thiserror::Error;

/// Error kinds surfaced by the supervisor, mapped to HTTP statuses at the
/// web boundary (400 / 404 / 409 / 500).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    BadInput(String),

    #[error("worker {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        WorkerError::BadInput(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        WorkerError::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WorkerError::Internal(anyhow::anyhow!(message.into()))
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Internal(err.into())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerError;

    #[test]
    fn not_found_names_the_worker() {
        let err = WorkerError::NotFound("abc123".to_string());
        assert_eq!(err.to_string(), "worker abc123 not found");
    }

    #[test]
    fn conflict_preserves_its_message() {
        let err = WorkerError::conflict("worker abc123 is not running");
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn io_errors_become_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: WorkerError = io.into();
        assert!(matches!(err, WorkerError::Internal(_)));
    }
}
