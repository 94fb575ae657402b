use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::tool::{DynTool, ToolDescriptor, ToolError};

/// In-memory registry mapping a tool name to an executable tool.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, DynTool>,
}

impl ToolCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, failing if the name is already present.
    ///
    /// On failure the catalog is left unchanged.
    pub fn register(&mut self, tool: DynTool) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Registers a batch of tools atomically: if any name collides with the
    /// catalog or with another tool in the batch, nothing is registered.
    pub fn register_batch(&mut self, tools: Vec<DynTool>) -> Result<(), ToolError> {
        let mut seen = HashSet::new();
        for tool in &tools {
            let name = tool.name();
            if self.tools.contains_key(name) || !seen.insert(name.to_string()) {
                return Err(ToolError::Duplicate(name.to_string()));
            }
        }
        for tool in tools {
            self.tools.insert(tool.name().to_string(), tool);
        }
        Ok(())
    }

    /// Gets a tool by name.
    pub fn get(&self, name: &str) -> Option<DynTool> {
        self.tools.get(name).cloned()
    }

    /// Gets a batch of tools, preserving input order with `None` for unknown
    /// names. Callers must filter the holes.
    pub fn get_batch(&self, names: &[String]) -> Vec<Option<DynTool>> {
        names.iter().map(|name| self.get(name)).collect()
    }

    /// Removes a tool from the catalog.
    pub fn remove(&mut self, name: &str) -> Option<DynTool> {
        self.tools.remove(name)
    }

    /// Returns whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Converts all tools to their descriptors.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|tool| tool.descriptor()).collect()
    }
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools_count", &self.tools.len())
            .finish()
    }
}
