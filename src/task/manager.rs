use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::task::event::{TaskEvent, TaskStatus};
use crate::task::spec::TaskSpecification;
use crate::task::store::{PersistenceError, TaskStore};
use crate::task::tracer::{TaskTracer, TracerStatus};
use crate::task::worker::{DynWorker, DynWorkerInvoker};
use crate::tool::ToolRetriever;

/// Fire-and-forget event callback.
///
/// Invoked from whichever worker task produced the transition; deliveries
/// for different agent ids may interleave arbitrarily. A panicking hook is
/// caught and logged, never propagated into the worker.
pub type OnEvent = Arc<dyn Fn(TaskEvent) + Send + Sync>;

/// Construction options for [`TaskManager`].
#[derive(Debug, Clone, Default)]
pub struct TaskManagerConfig {
    /// Directory scanned for `task_*.json` documents; `None` disables
    /// persistence entirely
    pub output_dir: Option<PathBuf>,
    /// Persist after every mutating call
    pub auto_save: bool,
}

type SharedTracer = Arc<Mutex<TaskTracer>>;

/// Records event transitions into the shared tracer, persists when asked,
/// and forwards each recorded event to the hook.
#[derive(Clone)]
struct Recorder {
    tracer: SharedTracer,
    store: Option<Arc<TaskStore>>,
    auto_save: bool,
    on_event: Option<OnEvent>,
}

impl Recorder {
    /// Records an event update. Returns `false` if the stored event was
    /// already cancelled and the update was dropped: a worker racing a
    /// cancellation must stand down, not corrupt history.
    async fn record(&self, event: &TaskEvent) -> Result<bool, RuntimeError> {
        let mut tracer = self.tracer.lock().await;
        if let Some(current) = tracer.get_event(&event.id) {
            if current.status == TaskStatus::Cancelled && event.status != TaskStatus::Cancelled {
                debug!(agent_id = %event.id, "dropping update for cancelled event");
                return Ok(false);
            }
        }
        tracer.record_event(event.clone())?;
        self.persist(&tracer).await;
        drop(tracer);
        self.notify(event);
        Ok(true)
    }

    /// Walks an event through the remaining legal transitions into `Failed`,
    /// recording each step. Used when a worker task dies without reporting
    /// back; the event may still be `Idle` or `Starting` at that point.
    async fn force_fail(&self, agent_id: &str, message: &str) -> Result<(), RuntimeError> {
        let mut tracer = self.tracer.lock().await;
        let Some(current) = tracer.get_event(agent_id) else {
            return Ok(());
        };
        let mut event = current.clone();
        let mut steps = Vec::new();
        while !event.is_completed() {
            match event.status {
                TaskStatus::Idle => event.mark_starting()?,
                TaskStatus::Starting => event.mark_running()?,
                TaskStatus::Running => event.fail(message)?,
                _ => break,
            }
            tracer.record_event(event.clone())?;
            steps.push(event.clone());
        }
        self.persist(&tracer).await;
        drop(tracer);
        for step in &steps {
            self.notify(step);
        }
        Ok(())
    }

    /// Writes the tracer's document when auto-save is on. The tracer lock is
    /// held by the caller, which serializes writes per tracer id. A failed
    /// write is logged and never interrupts a worker's lifecycle; callers
    /// needing a hard failure go through [`TaskManager::save_all`].
    async fn persist(&self, tracer: &TaskTracer) {
        if self.auto_save {
            if let Some(store) = &self.store {
                if let Err(error) = store.save(tracer).await {
                    warn!(task_id = %tracer.id(), %error, "failed to persist task document");
                }
            }
        }
    }

    fn notify(&self, event: &TaskEvent) {
        if let Some(hook) = &self.on_event {
            let delivery = event.clone();
            if catch_unwind(AssertUnwindSafe(|| hook(delivery))).is_err() {
                warn!(agent_id = %event.id, "event hook panicked; continuing");
            }
        }
    }
}

struct WorkerUnit {
    agent_id: String,
    worker: DynWorker,
}

/// A created task, ready to be driven to completion.
pub struct TaskHandle {
    id: String,
    units: std::sync::Mutex<Vec<WorkerUnit>>,
    recorder: Recorder,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Returns the backing tracer's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drives every worker concurrently and fans their results back in.
    ///
    /// Each worker runs in its own tokio task: transitions for a single
    /// agent id are strictly ordered, transitions across agent ids
    /// interleave. One worker's failure never aborts its siblings. Always
    /// resolves; the tracer's final status is terminal once this returns.
    pub async fn run(&self) -> Result<TracerStatus, RuntimeError> {
        let units: Vec<WorkerUnit> = {
            let mut guard = self
                .units
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.drain(..).collect()
        };

        let mut handles = Vec::with_capacity(units.len());
        for unit in units {
            let recorder = self.recorder.clone();
            let cancel = self.cancel.clone();
            let agent_id = unit.agent_id.clone();
            handles.push((
                unit.agent_id,
                tokio::spawn(drive_worker(recorder, cancel, agent_id, unit.worker)),
            ));
        }

        let mut first_error: Option<RuntimeError> = None;
        let (agent_ids, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        for (agent_id, join) in agent_ids.into_iter().zip(join_all(joins).await) {
            match join {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(%agent_id, %error, "worker driver failed");
                    first_error.get_or_insert(error);
                }
                Err(join_error) => {
                    warn!(%agent_id, %join_error, "worker task aborted");
                    self.recorder
                        .force_fail(&agent_id, "worker task aborted")
                        .await?;
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        Ok(self.status().await)
    }

    /// Runs with a deadline; on expiry the task is cancelled and every
    /// unsettled event transitions to `Cancelled`.
    pub async fn run_with_timeout(&self, timeout: Duration) -> Result<TracerStatus, RuntimeError> {
        tokio::select! {
            result = self.run() => result,
            _ = tokio::time::sleep(timeout) => {
                debug!(task_id = %self.id, "task deadline reached, cancelling");
                self.cancel().await?;
                Ok(self.status().await)
            }
        }
    }

    /// Cancels the task: signals every in-flight worker to stop and
    /// transitions every non-terminal event to `Cancelled`. Events that
    /// already settled are unaffected.
    pub async fn cancel(&self) -> Result<(), RuntimeError> {
        self.cancel.cancel();
        let mut cancelled = Vec::new();
        {
            let mut tracer = self.recorder.tracer.lock().await;
            let snapshot: Vec<TaskEvent> = tracer.list_events().to_vec();
            for mut event in snapshot {
                if event.is_completed() {
                    continue;
                }
                event.cancel()?;
                tracer.record_event(event.clone())?;
                cancelled.push(event);
            }
            self.recorder.persist(&tracer).await;
        }
        for event in &cancelled {
            self.recorder.notify(event);
        }
        Ok(())
    }

    /// Returns the tracer's current overall status.
    pub async fn status(&self) -> TracerStatus {
        self.recorder.tracer.lock().await.status()
    }

    /// Returns a snapshot of the backing tracer.
    pub async fn tracer(&self) -> TaskTracer {
        self.recorder.tracer.lock().await.clone()
    }
}

/// Drives one worker through its lifecycle, recording every transition.
async fn drive_worker(
    recorder: Recorder,
    cancel: CancellationToken,
    agent_id: String,
    worker: DynWorker,
) -> Result<(), RuntimeError> {
    let mut event = {
        let tracer = recorder.tracer.lock().await;
        match tracer.get_event(&agent_id) {
            Some(event) => event.clone(),
            None => return Ok(()),
        }
    };
    if event.is_completed() {
        return Ok(());
    }

    event.mark_starting()?;
    if !recorder.record(&event).await? {
        return Ok(());
    }
    event.mark_running()?;
    if !recorder.record(&event).await? {
        return Ok(());
    }

    let query = event.query.clone();
    tokio::select! {
        _ = cancel.cancelled() => {
            event.cancel()?;
            recorder.record(&event).await?;
        }
        result = worker.run(&query) => {
            match result {
                Ok(output) => {
                    debug!(%agent_id, "worker completed");
                    event.complete(output)?;
                }
                Err(error) => {
                    debug!(%agent_id, %error, "worker failed");
                    event.fail(error.to_string())?;
                }
            }
            recorder.record(&event).await?;
        }
    }
    Ok(())
}

/// Top-level coordinator: creates tasks from specifications, fans out their
/// workers, and persists tracers to a directory of documents.
pub struct TaskManager {
    tracers: Arc<Mutex<HashMap<String, SharedTracer>>>,
    store: Option<Arc<TaskStore>>,
    auto_save: bool,
}

impl TaskManager {
    /// Creates a manager; with an `output_dir`, existing task documents are
    /// loaded immediately. A corrupt document is reported and skipped, never
    /// fatal to the rest of the load.
    pub async fn new(config: TaskManagerConfig) -> Self {
        let store = config.output_dir.map(|dir| Arc::new(TaskStore::new(dir)));
        let mut tracers = HashMap::new();
        if let Some(store) = &store {
            let (loaded, errors) = store.load_all().await;
            for error in &errors {
                warn!(%error, "failed to load task document");
            }
            debug!(count = loaded.len(), "loaded task documents");
            for tracer in loaded {
                tracers.insert(tracer.id().to_string(), Arc::new(Mutex::new(tracer)));
            }
        }
        Self {
            tracers: Arc::new(Mutex::new(tracers)),
            store,
            auto_save: config.auto_save,
        }
    }

    /// Creates an in-memory manager with no persistence.
    pub fn in_memory() -> Self {
        Self {
            tracers: Arc::new(Mutex::new(HashMap::new())),
            store: None,
            auto_save: false,
        }
    }

    /// Creates a task from a specification.
    ///
    /// For each specialist: resolves its declared tool names through the
    /// retriever (unresolvable names are dropped), creates an idle event,
    /// and obtains a worker from the invoker. The returned handle is not
    /// running yet.
    pub async fn create_task(
        &self,
        query: impl Into<String>,
        spec: &TaskSpecification,
        retriever: &ToolRetriever,
        invoker: DynWorkerInvoker,
        on_event: Option<OnEvent>,
    ) -> Result<TaskHandle, RuntimeError> {
        let query = query.into();
        let mut tracer = TaskTracer::new();
        let mut units = Vec::with_capacity(spec.specialists.len());

        for specialist in &spec.specialists {
            let tools = retriever.resolve_by_name(&specialist.tools).await;
            debug!(
                specialist = %specialist.name,
                tools = tools.len(),
                "resolved specialist tools"
            );
            let worker = invoker
                .invoke(&specialist.name, &specialist.backstory, tools)
                .await?;
            let event = TaskEvent::new(&specialist.name, &query);
            let agent_id = event.id.clone();
            tracer.record_event(event)?;
            units.push(WorkerUnit { agent_id, worker });
        }

        let id = tracer.id().to_string();
        debug!(task_id = %id, specialists = units.len(), "created task");
        let shared = Arc::new(Mutex::new(tracer));
        self.tracers.lock().await.insert(id.clone(), shared.clone());

        let recorder = Recorder {
            tracer: shared.clone(),
            store: self.store.clone(),
            auto_save: self.auto_save,
            on_event,
        };
        recorder.persist(&*shared.lock().await).await;

        Ok(TaskHandle {
            id,
            units: std::sync::Mutex::new(units),
            recorder,
            cancel: CancellationToken::new(),
        })
    }

    /// Returns snapshots of every in-memory tracer.
    pub async fn list_tasks(&self) -> Vec<TaskTracer> {
        let tracers = self.tracers.lock().await;
        let mut out = Vec::with_capacity(tracers.len());
        for shared in tracers.values() {
            out.push(shared.lock().await.clone());
        }
        out
    }

    /// Returns a snapshot of one tracer by id.
    pub async fn get_task(&self, id: &str) -> Option<TaskTracer> {
        let shared = self.tracers.lock().await.get(id).cloned()?;
        let tracer = shared.lock().await.clone();
        Some(tracer)
    }

    /// Removes a tracer from memory; with auto-save on, the backing document
    /// is deleted as well.
    pub async fn delete_task(&self, id: &str) -> Result<(), RuntimeError> {
        self.tracers.lock().await.remove(id);
        if self.auto_save {
            if let Some(store) = &self.store {
                store.delete(id).await?;
            }
        }
        Ok(())
    }

    /// Writes every in-memory tracer to its document, reporting per-tracer
    /// failures without aborting the batch.
    pub async fn save_all(&self) -> Vec<PersistenceError> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let tracers: Vec<SharedTracer> = self.tracers.lock().await.values().cloned().collect();
        let mut errors = Vec::new();
        for shared in tracers {
            let tracer = shared.lock().await;
            if let Err(error) = store.save(&tracer).await {
                warn!(task_id = %tracer.id(), %error, "failed to save task document");
                errors.push(error);
            }
        }
        errors
    }

    /// Clears all in-memory tracers. Persisted documents are untouched.
    pub async fn cleanup(&self) {
        self.tracers.lock().await.clear();
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("auto_save", &self.auto_save)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::spec::SpecialistSpec;
    use crate::task::worker::{Worker, WorkerError, WorkerInvoker};
    use crate::tool::{DynTool, Tool, ToolError, ToolOutput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTool {
        name: String,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "stub tool"
        }

        async fn invoke(&self, _args: serde_json::Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::ok("ok"))
        }
    }

    enum Script {
        Succeed(String),
        FailWith(String),
        Hang,
        Panic,
    }

    struct ScriptedWorker {
        script: Script,
        delay: Duration,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn run(&self, _query: &str) -> Result<String, WorkerError> {
            match &self.script {
                Script::Succeed(result) => {
                    tokio::time::sleep(self.delay).await;
                    Ok(result.clone())
                }
                Script::FailWith(message) => {
                    tokio::time::sleep(self.delay).await;
                    Err(WorkerError::Execution(message.clone()))
                }
                Script::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Script::Panic => panic!("worker crashed"),
            }
        }
    }

    /// Hands each specialist a scripted worker and records the tool names it
    /// was given.
    struct ScriptedInvoker {
        scripts: std::sync::Mutex<HashMap<String, Script>>,
        seen_tools: std::sync::Mutex<HashMap<String, Vec<String>>>,
    }

    impl ScriptedInvoker {
        fn new(scripts: Vec<(&str, Script)>) -> Arc<Self> {
            Arc::new(Self {
                scripts: std::sync::Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(name, script)| (name.to_string(), script))
                        .collect(),
                ),
                seen_tools: std::sync::Mutex::new(HashMap::new()),
            })
        }
    }

    #[async_trait]
    impl WorkerInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            agent_name: &str,
            _backstory: &str,
            tools: Vec<DynTool>,
        ) -> Result<DynWorker, WorkerError> {
            self.seen_tools.lock().unwrap().insert(
                agent_name.to_string(),
                tools.iter().map(|t| t.name().to_string()).collect(),
            );
            let script = self
                .scripts
                .lock()
                .unwrap()
                .remove(agent_name)
                .ok_or_else(|| WorkerError::Startup(format!("no script for {agent_name}")))?;
            Ok(Arc::new(ScriptedWorker {
                script,
                delay: Duration::from_millis(10),
            }))
        }
    }

    async fn retriever_with(names: &[&str]) -> ToolRetriever {
        let retriever = ToolRetriever::new();
        for name in names {
            retriever
                .register(Arc::new(StubTool {
                    name: name.to_string(),
                }) as DynTool)
                .await
                .unwrap();
        }
        retriever
    }

    fn spec(specialists: Vec<SpecialistSpec>) -> TaskSpecification {
        TaskSpecification::new(specialists)
    }

    #[tokio::test]
    async fn mixed_success_and_failure_yields_failed_tracer() {
        let manager = TaskManager::in_memory();
        let retriever = retriever_with(&["search", "calculator"]).await;
        let invoker = ScriptedInvoker::new(vec![
            ("Researcher", Script::FailWith("search backend down".to_string())),
            ("Analyst", Script::Succeed("42".to_string())),
        ]);

        let handle = manager
            .create_task(
                "answer the question",
                &spec(vec![
                    SpecialistSpec::new("Researcher", "web researcher").with_tool("search"),
                    SpecialistSpec::new("Analyst", "number cruncher").with_tool("calculator"),
                ]),
                &retriever,
                invoker.clone(),
                None,
            )
            .await
            .unwrap();

        let status = handle.run().await.unwrap();
        assert_eq!(status, TracerStatus::Failed);

        let tracer = handle.tracer().await;
        let researcher = tracer
            .list_events()
            .iter()
            .find(|e| e.agent_name == "Researcher")
            .unwrap();
        assert_eq!(researcher.status, TaskStatus::Failed);
        assert_eq!(
            researcher.error.as_deref(),
            Some("worker execution failed: search backend down")
        );
        assert!(researcher.result.is_none());

        let analyst = tracer
            .list_events()
            .iter()
            .find(|e| e.agent_name == "Analyst")
            .unwrap();
        assert_eq!(analyst.status, TaskStatus::Completed);
        assert_eq!(analyst.result.as_deref(), Some("42"));
        assert!(analyst.error.is_none());

        let seen = invoker.seen_tools.lock().unwrap();
        assert_eq!(seen["Researcher"], vec!["search"]);
        assert_eq!(seen["Analyst"], vec!["calculator"]);
    }

    #[tokio::test]
    async fn all_workers_reach_terminal_state_concurrently() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("a", Script::Succeed("one".to_string())),
            ("b", Script::Succeed("two".to_string())),
            ("c", Script::Succeed("three".to_string())),
            ("d", Script::Succeed("four".to_string())),
        ]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![
                    SpecialistSpec::new("a", ""),
                    SpecialistSpec::new("b", ""),
                    SpecialistSpec::new("c", ""),
                    SpecialistSpec::new("d", ""),
                ]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();

        let status = handle.run().await.unwrap();
        assert_eq!(status, TracerStatus::Completed);

        let tracer = handle.tracer().await;
        assert_eq!(tracer.len(), 4);
        assert!(tracer.list_events().iter().all(|e| e.is_completed()));
        assert!(tracer.list_events().iter().all(|e| e.duration().is_some()));
    }

    #[tokio::test]
    async fn on_event_sees_ordered_transitions_per_agent() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("a", Script::Succeed("one".to_string())),
            ("b", Script::FailWith("nope".to_string())),
        ]);

        let deliveries: Arc<std::sync::Mutex<Vec<TaskEvent>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = deliveries.clone();
        let hook: OnEvent = Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        });

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("a", ""), SpecialistSpec::new("b", "")]),
                &retriever,
                invoker,
                Some(hook),
            )
            .await
            .unwrap();
        handle.run().await.unwrap();

        let deliveries = deliveries.lock().unwrap();
        let mut per_agent: HashMap<String, Vec<TaskStatus>> = HashMap::new();
        for event in deliveries.iter() {
            per_agent
                .entry(event.id.clone())
                .or_default()
                .push(event.status);
        }
        assert_eq!(per_agent.len(), 2);
        for statuses in per_agent.values() {
            assert_eq!(statuses[0], TaskStatus::Starting);
            assert_eq!(statuses[1], TaskStatus::Running);
            assert!(statuses[2].is_terminal());
            assert_eq!(statuses.len(), 3);
        }
    }

    #[tokio::test]
    async fn panicking_hook_does_not_abort_workers() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![("a", Script::Succeed("done".to_string()))]);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook: OnEvent = Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("subscriber bug");
        });

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("a", "")]),
                &retriever,
                invoker,
                Some(hook),
            )
            .await
            .unwrap();

        let status = handle.run().await.unwrap();
        assert_eq!(status, TracerStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn force_fail_repairs_events_stuck_before_running() {
        let mut tracer = TaskTracer::new();
        let idle = TaskEvent::new("idle", "q");
        let mut starting = TaskEvent::new("starting", "q");
        tracer.record_event(idle.clone()).unwrap();
        tracer.record_event(starting.clone()).unwrap();
        starting.mark_starting().unwrap();
        tracer.record_event(starting.clone()).unwrap();

        let recorder = Recorder {
            tracer: Arc::new(Mutex::new(tracer)),
            store: None,
            auto_save: false,
            on_event: None,
        };
        recorder
            .force_fail(&idle.id, "worker task aborted")
            .await
            .unwrap();
        recorder
            .force_fail(&starting.id, "worker task aborted")
            .await
            .unwrap();

        let tracer = recorder.tracer.lock().await;
        for id in [&idle.id, &starting.id] {
            let event = tracer.get_event(id).unwrap();
            assert_eq!(event.status, TaskStatus::Failed);
            assert_eq!(event.error.as_deref(), Some("worker task aborted"));
            assert!(event.started_at.is_some());
            assert!(event.completed_at.is_some());
        }
    }

    #[tokio::test]
    async fn panicking_worker_is_recorded_as_failed() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("crasher", Script::Panic),
            ("steady", Script::Succeed("fine".to_string())),
        ]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![
                    SpecialistSpec::new("crasher", ""),
                    SpecialistSpec::new("steady", ""),
                ]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();

        let status = handle.run().await.unwrap();
        assert_eq!(status, TracerStatus::Failed);

        let tracer = handle.tracer().await;
        let crasher = tracer
            .list_events()
            .iter()
            .find(|e| e.agent_name == "crasher")
            .unwrap();
        assert_eq!(crasher.status, TaskStatus::Failed);
        assert_eq!(crasher.error.as_deref(), Some("worker task aborted"));
        let steady = tracer
            .list_events()
            .iter()
            .find(|e| e.agent_name == "steady")
            .unwrap();
        assert_eq!(steady.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn unwritable_output_dir_does_not_abort_workers() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the store expects a directory makes every
        // write fail, regardless of process privileges.
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"not a directory").await.unwrap();

        let manager = TaskManager::new(TaskManagerConfig {
            output_dir: Some(blocker.join("tasks")),
            auto_save: true,
        })
        .await;
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("a", Script::Succeed("one".to_string())),
            ("b", Script::FailWith("boom".to_string())),
        ]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("a", ""), SpecialistSpec::new("b", "")]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();

        let status = handle.run().await.unwrap();
        assert_eq!(status, TracerStatus::Failed);
        let tracer = handle.tracer().await;
        assert!(tracer.list_events().iter().all(|e| e.is_completed()));

        // The strict surface still reports the write failure.
        let errors = manager.save_all().await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn cancel_settles_running_and_pending_events() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("hanger", Script::Hang),
            ("quick", Script::Succeed("fast".to_string())),
        ]);

        let handle = Arc::new(
            manager
                .create_task(
                    "q",
                    &spec(vec![
                        SpecialistSpec::new("hanger", ""),
                        SpecialistSpec::new("quick", ""),
                    ]),
                    &retriever,
                    invoker,
                    None,
                )
                .await
                .unwrap(),
        );

        let runner = handle.clone();
        let run = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel().await.unwrap();
        run.await.unwrap().unwrap();

        let tracer = handle.tracer().await;
        let hanger = tracer
            .list_events()
            .iter()
            .find(|e| e.agent_name == "hanger")
            .unwrap();
        assert_eq!(hanger.status, TaskStatus::Cancelled);
        let quick = tracer
            .list_events()
            .iter()
            .find(|e| e.agent_name == "quick")
            .unwrap();
        // Finished before the cancellation; unaffected.
        assert_eq!(quick.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_settles_one_running_and_one_idle_event_together() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("hanger", Script::Hang),
            ("benched", Script::Succeed("unused".to_string())),
        ]);

        let handle = Arc::new(
            manager
                .create_task(
                    "q",
                    &spec(vec![
                        SpecialistSpec::new("hanger", ""),
                        SpecialistSpec::new("benched", ""),
                    ]),
                    &retriever,
                    invoker,
                    None,
                )
                .await
                .unwrap(),
        );

        // Hold one worker back so its event is still idle while the other
        // runs.
        let benched_id = handle
            .tracer()
            .await
            .list_events()
            .iter()
            .find(|e| e.agent_name == "benched")
            .unwrap()
            .id
            .clone();
        handle
            .units
            .lock()
            .unwrap()
            .retain(|unit| unit.agent_id != benched_id);

        let runner = handle.clone();
        let run = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let tracer = handle.tracer().await;
        assert_eq!(
            tracer.get_event(&benched_id).map(|e| e.status),
            Some(TaskStatus::Idle)
        );
        assert!(
            tracer
                .list_events()
                .iter()
                .any(|e| e.status == TaskStatus::Running)
        );

        handle.cancel().await.unwrap();
        run.await.unwrap().unwrap();

        let tracer = handle.tracer().await;
        assert!(
            tracer
                .list_events()
                .iter()
                .all(|e| e.status == TaskStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn cancelling_before_run_settles_every_idle_event() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("a", Script::Succeed("unused".to_string())),
            ("b", Script::Succeed("unused".to_string())),
        ]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("a", ""), SpecialistSpec::new("b", "")]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();

        handle.cancel().await.unwrap();
        let tracer = handle.tracer().await;
        assert!(
            tracer
                .list_events()
                .iter()
                .all(|e| e.status == TaskStatus::Cancelled)
        );

        // Running afterwards is a no-op for the already-settled events.
        handle.run().await.unwrap();
        let tracer = handle.tracer().await;
        assert!(
            tracer
                .list_events()
                .iter()
                .all(|e| e.status == TaskStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn run_with_timeout_cancels_overdue_workers() {
        let manager = TaskManager::in_memory();
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![("hanger", Script::Hang)]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("hanger", "")]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();

        handle
            .run_with_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        let tracer = handle.tracer().await;
        assert_eq!(
            tracer.list_events()[0].status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn auto_save_persists_and_a_fresh_manager_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(TaskManagerConfig {
            output_dir: Some(dir.path().to_path_buf()),
            auto_save: true,
        })
        .await;
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![
            ("a", Script::Succeed("one".to_string())),
            ("b", Script::Succeed("two".to_string())),
        ]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("a", ""), SpecialistSpec::new("b", "")]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();
        handle.run().await.unwrap();
        let original = handle.tracer().await;

        let reloaded = TaskManager::new(TaskManagerConfig {
            output_dir: Some(dir.path().to_path_buf()),
            auto_save: true,
        })
        .await;
        let tasks = reloaded.list_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0], original);

        reloaded.delete_task(original.id()).await.unwrap();
        assert!(reloaded.get_task(original.id()).await.is_none());
        assert!(
            !dir.path()
                .join(format!("task_{}.json", original.id()))
                .exists()
        );
    }

    #[tokio::test]
    async fn corrupt_document_does_not_block_loading_others() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("task_bad.json"), b"{broken")
            .await
            .unwrap();
        let store = TaskStore::new(dir.path());
        let mut tracer = TaskTracer::new();
        tracer
            .record_event(TaskEvent::new("survivor", "q"))
            .unwrap();
        store.save(&tracer).await.unwrap();

        let manager = TaskManager::new(TaskManagerConfig {
            output_dir: Some(dir.path().to_path_buf()),
            auto_save: false,
        })
        .await;
        let tasks = manager.list_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id(), tracer.id());
    }

    #[tokio::test]
    async fn cleanup_clears_memory_but_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(TaskManagerConfig {
            output_dir: Some(dir.path().to_path_buf()),
            auto_save: true,
        })
        .await;
        let retriever = ToolRetriever::new();
        let invoker = ScriptedInvoker::new(vec![("a", Script::Succeed("one".to_string()))]);

        let handle = manager
            .create_task(
                "q",
                &spec(vec![SpecialistSpec::new("a", "")]),
                &retriever,
                invoker,
                None,
            )
            .await
            .unwrap();
        handle.run().await.unwrap();
        let id = handle.id().to_string();

        manager.cleanup().await;
        assert!(manager.list_tasks().await.is_empty());
        assert!(dir.path().join(format!("task_{id}.json")).exists());
    }
}
