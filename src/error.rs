//! Error types for the task runtime.

use thiserror::Error;

/// Unified error type for the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Tool registration or invocation error
    #[error("Tool error: {0}")]
    Tool(#[from] crate::tool::ToolError),

    /// Task state machine error
    #[error("Task error: {0}")]
    Task(#[from] crate::task::TaskError),

    /// Document save/load error
    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::task::PersistenceError),

    /// Worker framework error
    #[error("Worker error: {0}")]
    Worker(#[from] crate::task::WorkerError),
}
