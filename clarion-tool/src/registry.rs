//! Native tools, keyed by the exact name a model calls them by.

use std::collections::HashMap;
use std::sync::Arc;

use clarion_types::{Tool, ToolContext, ToolDefinition, ToolDyn, ToolError, ToolResultPayload};

use crate::middleware::{Next, ToolCall, ToolMiddleware};

/// In-process tools and the middleware wrapped around them.
///
/// Only native tools live here; remote services are reached through
/// [`RemoteToolRouter`](crate::RemoteToolRouter) and never pass through
/// this middleware. A tool's output comes back as a [`ToolResultPayload`]:
/// typed tools are decoded with [`ToolResultPayload::from_value`], so text
/// stays text and MCP-style content blocks become text or images.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolDyn>>,
    global_middleware: Vec<Arc<dyn ToolMiddleware>>,
    tool_middleware: HashMap<String, Vec<Arc<dyn ToolMiddleware>>>,
}

impl ToolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            global_middleware: Vec::new(),
            tool_middleware: HashMap::new(),
        }
    }

    /// Register a typed tool under [`Tool::NAME`].
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.insert(T::NAME.to_string(), Arc::new(tool));
    }

    /// Register an already type-erased tool under its own name.
    pub fn register_dyn(&mut self, tool: Arc<dyn ToolDyn>) {
        self.insert(tool.name().to_string(), tool);
    }

    fn insert(&mut self, name: String, tool: Arc<dyn ToolDyn>) {
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replaced previously registered tool");
        }
    }

    /// The tool registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolDyn>> {
        self.tools.get(name).cloned()
    }

    /// Whether `name` resolves to a native tool. No prefix matching.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every native tool, sorted by name.
    ///
    /// A stable order keeps `tools[N]` indices in backend rejections
    /// pointing at the same tool from one request to the next.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Wrap every native tool in `m`.
    pub fn add_middleware(&mut self, m: impl ToolMiddleware + 'static) -> &mut Self {
        self.global_middleware.push(Arc::new(m));
        self
    }

    /// Wrap only the tool named `tool_name` in `m`.
    pub fn add_tool_middleware(
        &mut self,
        tool_name: &str,
        m: impl ToolMiddleware + 'static,
    ) -> &mut Self {
        self.tool_middleware
            .entry(tool_name.to_string())
            .or_default()
            .push(Arc::new(m));
        self
    }

    /// Run `call` through global middleware, then the tool's own
    /// middleware, then the tool.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResultPayload, ToolError> {
        let Some(tool) = self.tools.get(&call.name) else {
            return Err(ToolError::NotFound(call.name.clone()));
        };

        let chain: Vec<Arc<dyn ToolMiddleware>> = self
            .global_middleware
            .iter()
            .chain(self.tool_middleware.get(&call.name).into_iter().flatten())
            .cloned()
            .collect();

        Next::new(tool.as_ref(), &chain).run(call, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
