pub mod event;
pub mod manager;
pub mod spec;
pub mod store;
pub mod tracer;
pub mod worker;

pub use event::{TaskError, TaskEvent, TaskStatus};
pub use manager::{OnEvent, TaskHandle, TaskManager, TaskManagerConfig};
pub use spec::{SpecialistSpec, TaskSpecification};
pub use store::{PersistenceError, TaskStore};
pub use tracer::{DocumentError, TaskTracer, TracerStatus};
pub use worker::{DynWorker, DynWorkerInvoker, Worker, WorkerError, WorkerInvoker};
