use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::tool::{
    DynTool, Tool, ToolCatalog, ToolDescriptor, ToolError, ToolIndex, ToolOutput,
};

/// Options for a retrieval query.
#[derive(Debug, Clone, Copy)]
pub struct RetrieveOptions {
    /// Maximum number of tools to return
    pub top_k: usize,
    /// Minimum similarity score to keep a result
    pub min_score: f32,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.0,
        }
    }
}

struct Inner {
    catalog: ToolCatalog,
    index: ToolIndex,
}

/// The public retrieval facade.
///
/// Registers tools into both the catalog and the similarity index, answers
/// `retrieve` (similarity) and `resolve_by_name` (direct lookup) queries, and
/// can expose itself as a tool for recursive use by a meta-agent.
///
/// Retrieval is read-heavy and shareable; registration takes exclusive
/// access. Cloning is cheap and shares the same underlying state.
#[derive(Clone)]
pub struct ToolRetriever {
    inner: Arc<RwLock<Inner>>,
}

impl Default for ToolRetriever {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRetriever {
    /// Creates a new empty retriever.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                catalog: ToolCatalog::new(),
                index: ToolIndex::new(),
            })),
        }
    }

    /// Registers a tool into the catalog and the index together.
    ///
    /// A duplicate name leaves both untouched.
    pub async fn register(&self, tool: DynTool) -> Result<(), ToolError> {
        let mut inner = self.inner.write().await;
        if inner.catalog.contains(tool.name()) {
            return Err(ToolError::Duplicate(tool.name().to_string()));
        }
        let description = tool.description().to_string();
        let name = tool.name().to_string();
        inner.index.add(&name, &description)?;
        inner.catalog.register(tool)?;
        Ok(())
    }

    /// Registers a batch of tools atomically: any duplicate name aborts the
    /// whole batch and leaves the catalog and index unchanged.
    pub async fn register_batch(&self, tools: Vec<DynTool>) -> Result<(), ToolError> {
        let mut inner = self.inner.write().await;
        inner.catalog.register_batch(tools.clone())?;
        for tool in tools {
            // Cannot collide: the catalog batch above vetted every name.
            inner.index.add(tool.name(), tool.description())?;
        }
        Ok(())
    }

    /// Redefines a tool: removes any existing entry under the same name from
    /// both catalog and index, then registers the new one.
    pub async fn replace(&self, tool: DynTool) -> Result<(), ToolError> {
        let mut inner = self.inner.write().await;
        inner.catalog.remove(tool.name());
        inner.index.remove(tool.name());
        inner.index.add(tool.name(), tool.description())?;
        inner.catalog.register(tool)
    }

    /// Retrieves the tools most relevant to a query with default options.
    pub async fn retrieve(&self, query: &str) -> Vec<DynTool> {
        self.retrieve_with(query, RetrieveOptions::default()).await
    }

    /// Retrieves the tools most relevant to a query.
    ///
    /// Runs the similarity search, resolves the ranked names through the
    /// catalog and returns only successful resolutions, order preserved.
    /// An empty index yields `[]`, never an error.
    pub async fn retrieve_with(&self, query: &str, opts: RetrieveOptions) -> Vec<DynTool> {
        let inner = self.inner.read().await;
        let ranked = inner.index.query(query, opts.top_k, opts.min_score);
        debug!(query, results = ranked.len(), "tool retrieval");
        ranked
            .into_iter()
            .filter_map(|(name, _score)| inner.catalog.get(&name))
            .collect()
    }

    /// Resolves tool names directly through the catalog.
    ///
    /// Lenient by design: unknown names are dropped (a planning step may
    /// hallucinate tool names), and each resolvable name appears exactly once
    /// regardless of how many times it occurs in the input.
    pub async fn resolve_by_name<S: AsRef<str>>(&self, names: &[S]) -> Vec<DynTool> {
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !seen.insert(name.to_string()) {
                continue;
            }
            match inner.catalog.get(name) {
                Some(tool) => tools.push(tool),
                None => debug!(name, "dropping unresolved tool name"),
            }
        }
        tools
    }

    /// Returns descriptors for every registered tool.
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.inner.read().await.catalog.descriptors()
    }

    /// Returns the number of registered tools.
    pub async fn len(&self) -> usize {
        self.inner.read().await.catalog.len()
    }

    /// Returns whether no tools are registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.catalog.is_empty()
    }

    /// Wraps the retriever itself as a tool, so an agent can ask for the
    /// tools relevant to a sub-task.
    pub fn as_tool(&self) -> DynTool {
        Arc::new(RetrieverTool {
            retriever: self.clone(),
        })
    }
}

impl std::fmt::Debug for ToolRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRetriever").finish_non_exhaustive()
    }
}

/// Adapter exposing a [`ToolRetriever`] as a regular tool.
struct RetrieverTool {
    retriever: ToolRetriever,
}

#[async_trait]
impl Tool for RetrieverTool {
    fn name(&self) -> &str {
        "tools_retriever"
    }

    fn description(&self) -> &str {
        "Finds the tools most relevant to a natural-language query. \
         Returns a JSON array of {name, description} objects."
    }

    async fn invoke(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let query = match &args {
            Value::String(query) => query.clone(),
            Value::Object(map) => map
                .get("query")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ToolError::InvalidArguments("expected a \"query\" field".to_string())
                })?,
            _ => {
                return Err(ToolError::InvalidArguments(
                    "expected a string or {\"query\": ...}".to_string(),
                ));
            }
        };

        let descriptors: Vec<ToolDescriptor> = self
            .retriever
            .retrieve(&query)
            .await
            .iter()
            .map(|tool| tool.descriptor())
            .collect();
        let output = serde_json::to_string(&descriptors)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(ToolOutput::ok(output))
    }
}
