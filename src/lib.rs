//! # Task Runtime
//!
//! A task execution runtime for multi-step, multi-agent work: it tracks the
//! lifecycle of every worker in a task, records each step as an auditable
//! event, persists that history durably, and exposes a semantic tool
//! retrieval index so workers are handed only the tools relevant to their
//! sub-task.
//!
//! ## Features
//!
//! - **Tool Retrieval**: similarity-ranked lookup over tool descriptions
//!   with score and size cutoffs, plus lenient by-name resolution
//! - **Task Tracing**: a checked per-worker state machine
//!   (`idle → starting → running → completed | failed | cancelled`) with
//!   lossless JSON round-trips
//! - **Concurrent Execution**: one tokio task per worker, fan-in with
//!   cancellation and timeouts; sibling failures never abort each other
//! - **Durable History**: one atomically written `task_<id>.json` per task
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use task_runtime::prelude::*;
//! use task_runtime::task::DynWorkerInvoker;
//!
//! # async fn example(my_tool: task_runtime::tool::DynTool, invoker: DynWorkerInvoker)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! // Register tools once at startup.
//! let retriever = ToolRetriever::new();
//! retriever.register(my_tool).await?;
//!
//! // Create a manager that persists every change.
//! let manager = TaskManager::new(TaskManagerConfig {
//!     output_dir: Some("./tasks".into()),
//!     auto_save: true,
//! })
//! .await;
//!
//! // Execute a task specification produced by a planning step.
//! let spec = TaskSpecification::new(vec![
//!     SpecialistSpec::new("Researcher", "web researcher").with_tool("search"),
//! ]);
//! let handle = manager
//!     .create_task("answer the question", &spec, &retriever, invoker, None)
//!     .await?;
//! let status = handle.run().await?;
//! println!("task {} finished: {:?}", handle.id(), status);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod task;
pub mod tool;

// Re-exports for convenient usage
pub use error::RuntimeError;
pub use task::{
    OnEvent, PersistenceError, SpecialistSpec, TaskError, TaskEvent, TaskHandle, TaskManager,
    TaskManagerConfig, TaskSpecification, TaskStatus, TaskStore, TaskTracer, TracerStatus, Worker,
    WorkerError, WorkerInvoker,
};
pub use tool::{
    DynTool, RetrieveOptions, Tool, ToolCatalog, ToolDescriptor, ToolError, ToolIndex, ToolOutput,
    ToolRetriever,
};

/// Prelude module with commonly used types.
pub mod prelude {
    pub use crate::error::RuntimeError;
    pub use crate::task::{
        SpecialistSpec, TaskEvent, TaskManager, TaskManagerConfig, TaskSpecification, TaskStatus,
        TaskTracer, TracerStatus, Worker, WorkerInvoker,
    };
    pub use crate::tool::{DynTool, RetrieveOptions, Tool, ToolRetriever};
}
