mod error;
mod manager;
mod parser;
mod store;
mod tailer;
pub mod types;

pub use error::WorkerError;
pub use manager::{
    LogLineCallback, MetadataPatch, ThreadMessageCallback, WorkerExitCallback, WorkerManager,
};
pub use parser::AmpLogParser;
pub use store::{StateStore, ThreadStorage, WorkerRegistry};
pub use tailer::{LogLine, LogTailer};
pub use types::{can_transition, MessageType, ThreadMessage, Worker, WorkerStatus};
