pub mod catalog;
pub mod index;
pub mod retriever;

pub use catalog::ToolCatalog;
pub use index::ToolIndex;
pub use retriever::{RetrieveOptions, ToolRetriever};
pub use tool_types::{ToolDescriptor, ToolError, ToolOutput};
pub use tool_trait::DynTool;
pub use tool_trait::Tool;

mod tool_types {
    use serde::{Deserialize, Serialize};

    /// Serializable projection of a tool: what a planner or meta-agent sees.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ToolDescriptor {
        /// The name of the tool
        pub name: String,
        /// A description of what the tool does
        pub description: String,
    }

    /// The result of invoking a tool.
    #[derive(Debug, Clone)]
    pub struct ToolOutput {
        /// The output from the tool
        pub output: String,
        /// Optional metadata from the invocation
        pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    }

    impl ToolOutput {
        /// Creates a successful output.
        pub fn ok(output: impl Into<String>) -> Self {
            Self {
                output: output.into(),
                metadata: None,
            }
        }
    }

    /// Errors that can occur when registering or invoking a tool.
    #[derive(Debug, thiserror::Error)]
    pub enum ToolError {
        #[error("Duplicate tool: {0}")]
        Duplicate(String),
        #[error("Invalid arguments: {0}")]
        InvalidArguments(String),
        #[error("Execution failed: {0}")]
        ExecutionFailed(String),
        #[error("Tool not found: {0}")]
        NotFound(String),
    }
}

mod tool_trait {
    use super::tool_types::{ToolDescriptor, ToolError, ToolOutput};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    /// Trait representing an executable tool.
    ///
    /// Every tool-producing collaborator must return this shape; the runtime
    /// never adapts foreign objects at call time.
    #[async_trait]
    pub trait Tool: Send + Sync {
        /// Returns the name of the tool (unique within a catalog).
        fn name(&self) -> &str;
        /// Returns a description of what the tool does.
        fn description(&self) -> &str;

        /// Invokes the tool with the given arguments.
        async fn invoke(&self, args: Value) -> Result<ToolOutput, ToolError>;

        /// Converts the tool to its descriptor.
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: self.name().to_string(),
                description: self.description().to_string(),
            }
        }
    }

    /// A type alias for a dynamic tool reference.
    pub type DynTool = Arc<dyn Tool>;
}
