use std::sync::Arc;

use async_trait::async_trait;

use crate::tool::DynTool;

/// Errors raised by the external worker framework.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The invoker could not produce a worker
    #[error("worker startup failed: {0}")]
    Startup(String),
    /// The worker's execution raised
    #[error("worker execution failed: {0}")]
    Execution(String),
}

/// An executable worker reference, obtained from a [`WorkerInvoker`].
///
/// The actual LLM or agent-framework call lives behind this trait; the
/// runtime only observes success or a typed failure.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Runs the worker against a query, returning its textual result.
    async fn run(&self, query: &str) -> Result<String, WorkerError>;
}

/// A type alias for a dynamic worker reference.
pub type DynWorker = Arc<dyn Worker>;

/// The collaborator boundary that turns a specialist into a worker.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    /// Builds a worker for the named specialist with its resolved tools.
    async fn invoke(
        &self,
        agent_name: &str,
        backstory: &str,
        tools: Vec<DynTool>,
    ) -> Result<DynWorker, WorkerError>;
}

/// A type alias for a dynamic invoker reference.
pub type DynWorkerInvoker = Arc<dyn WorkerInvoker>;
