use serde::{Deserialize, Serialize};

/// A task specification: the named workers a planning step decided on.
///
/// Consumed, never owned: produced by an external assessment/planning
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpecification {
    /// The specialists to execute this task
    pub specialists: Vec<SpecialistSpec>,
}

/// One specialist worker in a task specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistSpec {
    /// Display name of the specialist
    pub name: String,
    /// Persona / role description handed to the worker framework
    pub backstory: String,
    /// Names of the tools this specialist should be given
    #[serde(default)]
    pub tools: Vec<String>,
}

impl SpecialistSpec {
    /// Creates a specialist with the given name and backstory.
    pub fn new(name: impl Into<String>, backstory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backstory: backstory.into(),
            tools: Vec::new(),
        }
    }

    /// Adds a tool name to the specialist.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }
}

impl TaskSpecification {
    /// Creates a specification from a list of specialists.
    pub fn new(specialists: Vec<SpecialistSpec>) -> Self {
        Self { specialists }
    }
}
