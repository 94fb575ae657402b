use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The status of a worker's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet scheduled
    Idle,
    /// Scheduled, worker being prepared
    Starting,
    /// Worker is executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by a cancellation signal
    Cancelled,
}

impl TaskStatus {
    /// Returns whether this status is terminal. Terminal states are sinks.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether `self -> to` is a legal transition.
    ///
    /// `Idle -> Cancelled` is legal so that a task cancelled before any
    /// worker was scheduled still settles every event.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        match self {
            Self::Idle => matches!(to, Self::Starting | Self::Cancelled),
            Self::Starting => matches!(to, Self::Running | Self::Cancelled),
            Self::Running => matches!(to, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// Errors from the task state machine.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A status update violated the state machine
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    /// A newly recorded event was not in a creatable state
    #[error("new event must be idle or starting, got {0:?}")]
    InvalidInitialStatus(TaskStatus),
}

/// One worker's execution record: immutable once terminal.
///
/// `result` and `error` are mutually exclusive and both `None` until the
/// event reaches a terminal state. `completed_at` is stamped exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Globally unique agent id, assigned at creation
    pub id: String,
    /// Display name of the agent
    pub agent_name: String,
    /// The instruction given to this worker
    pub query: String,
    /// Current status
    pub status: TaskStatus,
    /// When the worker started running
    pub started_at: Option<DateTime<Utc>>,
    /// When the worker reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress notes accumulated during execution
    #[serde(default)]
    pub messages: Vec<String>,
    /// The worker's result, set on completion
    pub result: Option<String>,
    /// The worker's error, set on failure
    pub error: Option<String>,
}

impl TaskEvent {
    /// Creates a new idle event with a fresh agent id.
    pub fn new(agent_name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            query: query.into(),
            status: TaskStatus::Idle,
            started_at: None,
            completed_at: None,
            messages: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Applies a status transition, stamping timestamps as a side effect.
    ///
    /// Entering `Running` sets `started_at`; entering a terminal state sets
    /// `completed_at`. An illegal transition fails without mutating the
    /// event: duplicate completion callbacks from an unreliable worker
    /// framework must not overwrite terminal state.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition(to) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Marks the event as starting.
    pub fn mark_starting(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Starting)
    }

    /// Marks the event as running.
    pub fn mark_running(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running)
    }

    /// Completes the event with a result.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result.into());
        Ok(())
    }

    /// Fails the event with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Cancels the event.
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Appends a progress note.
    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Returns how long the worker ran, if both timestamps are set.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    /// Returns whether the worker is currently running.
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// Returns whether the event reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }
}
