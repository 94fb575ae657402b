use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::event::{TaskError, TaskEvent, TaskStatus};

/// The overall status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerStatus {
    /// No worker has started yet
    Pending,
    /// At least one worker is still in flight
    Running,
    /// Every worker settled and none failed
    Completed,
    /// Nothing is running and at least one worker failed
    Failed,
}

/// Errors from the tracer document codec.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event key {key} does not match event id {id}")]
    KeyMismatch { key: String, id: String },
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("malformed document: {0}")]
    Malformed(&'static str),
}

/// The event store for a single task execution.
///
/// Owns one [`TaskEvent`] per worker, keyed by agent id with insertion order
/// preserved. The tracer is the serialization boundary, so it also enforces
/// the event state machine on every upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTracer {
    id: String,
    events: Vec<TaskEvent>,
    index: HashMap<String, usize>,
}

impl TaskTracer {
    /// Creates a new empty tracer with a fresh id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the tracer's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Upserts an event by agent id.
    ///
    /// A first insertion must be `Idle` or `Starting`. An update must keep
    /// the stored status or be a legal transition away from it; a terminal
    /// event can only be refreshed in place, never moved to another status.
    pub fn record_event(&mut self, event: TaskEvent) -> Result<(), TaskError> {
        match self.index.get(&event.id) {
            Some(&pos) => {
                let current = self.events[pos].status;
                if current != event.status && !current.can_transition(event.status) {
                    return Err(TaskError::InvalidTransition {
                        from: current,
                        to: event.status,
                    });
                }
                self.events[pos] = event;
            }
            None => {
                if !matches!(event.status, TaskStatus::Idle | TaskStatus::Starting) {
                    return Err(TaskError::InvalidInitialStatus(event.status));
                }
                self.index.insert(event.id.clone(), self.events.len());
                self.events.push(event);
            }
        }
        Ok(())
    }

    /// Gets an event by agent id.
    pub fn get_event(&self, agent_id: &str) -> Option<&TaskEvent> {
        self.index.get(agent_id).map(|&pos| &self.events[pos])
    }

    /// Lists events in insertion order.
    pub fn list_events(&self) -> &[TaskEvent] {
        &self.events
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns whether the tracer has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Computes the overall status.
    ///
    /// Policy: `Running` wins while anything is in flight; once nothing runs,
    /// `Failed` dominates any mix that contains a failure; `Completed`
    /// requires every event terminal; `Pending` means nothing has started.
    /// A partially started mix without failures reports `Running`.
    pub fn status(&self) -> TracerStatus {
        if self.events.iter().any(TaskEvent::is_running) {
            return TracerStatus::Running;
        }
        if self.events.iter().any(|e| e.status == TaskStatus::Failed) {
            return TracerStatus::Failed;
        }
        if !self.events.is_empty() && self.events.iter().all(TaskEvent::is_completed) {
            return TracerStatus::Completed;
        }
        if self.events.iter().all(|e| e.status == TaskStatus::Idle) {
            return TracerStatus::Pending;
        }
        TracerStatus::Running
    }

    /// Serializes the tracer to a single JSON document keyed by agent id.
    pub fn to_document(&self) -> Result<Value, DocumentError> {
        let mut events = serde_json::Map::new();
        for event in &self.events {
            events.insert(event.id.clone(), serde_json::to_value(event)?);
        }
        let mut doc = serde_json::Map::new();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        doc.insert("events".to_string(), Value::Object(events));
        Ok(Value::Object(doc))
    }

    /// Reconstructs a tracer from a document.
    ///
    /// Rejects documents whose event keys do not match each event's own id,
    /// which defends against hand-edited or corrupted files.
    pub fn from_document(doc: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut map) = doc else {
            return Err(DocumentError::Malformed("document is not an object"));
        };
        let id = match map.remove("id") {
            Some(Value::String(id)) => id,
            Some(_) => return Err(DocumentError::Malformed("id is not a string")),
            None => return Err(DocumentError::Missing("id")),
        };
        let events_map = match map.remove("events") {
            Some(Value::Object(events)) => events,
            Some(_) => return Err(DocumentError::Malformed("events is not an object")),
            None => return Err(DocumentError::Missing("events")),
        };

        let mut tracer = Self {
            id,
            events: Vec::with_capacity(events_map.len()),
            index: HashMap::with_capacity(events_map.len()),
        };
        for (key, value) in events_map {
            let event: TaskEvent = serde_json::from_value(value)?;
            if event.id != key {
                return Err(DocumentError::KeyMismatch { key, id: event.id });
            }
            tracer.index.insert(event.id.clone(), tracer.events.len());
            tracer.events.push(event);
        }
        Ok(tracer)
    }
}

impl Default for TaskTracer {
    fn default() -> Self {
        Self::new()
    }
}
