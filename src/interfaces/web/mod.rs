mod dto;
mod error;
mod handlers;
mod query;
mod router;

use std::sync::Arc;

use crate::core::hub::HubHandle;
use crate::core::worker::WorkerManager;

pub use dto::{
    PaginatedTasksResponse, PaginatedThreadResponse, PatchTaskRequest, StartTaskRequest, TaskDto,
    ThreadMessageDto,
};
pub use error::ApiError;
pub use query::{generate_cursor, parse_cursor, parse_task_query, TaskQuery};
pub use router::app;

/// Shared handler state. The hub is optional so tests can exercise handlers
/// without standing up the event loop; broadcasts become no-ops.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<WorkerManager>,
    pub hub: Option<HubHandle>,
}
