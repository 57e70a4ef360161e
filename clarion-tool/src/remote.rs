//! Routing of prefixed tool names to remote tool services.
//!
//! A remote tool is addressed as `<prefix><server>_<tool>`, for example
//! `mcp_github_create_issue` for tool `create_issue` on server `github`.
//! Server names may themselves contain underscores; the longest registered
//! server name that matches wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use clarion_types::{RemoteToolService, ToolDefinition};

/// Default prefix of remote tool names.
pub const DEFAULT_REMOTE_PREFIX: &str = "mcp_";

/// A resolved remote call target.
pub struct RemoteTarget<'a> {
    /// The server name.
    pub server: &'a str,
    /// The tool name on that server.
    pub tool: &'a str,
    /// The service to call.
    pub service: &'a Arc<dyn RemoteToolService>,
}

/// Maps server names to remote tool services.
pub struct RemoteToolRouter {
    prefix: String,
    servers: BTreeMap<String, Arc<dyn RemoteToolService>>,
}

impl RemoteToolRouter {
    /// Create an empty router using [`DEFAULT_REMOTE_PREFIX`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: DEFAULT_REMOTE_PREFIX.to_string(),
            servers: BTreeMap::new(),
        }
    }

    /// Override the name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Register a service under a server name.
    pub fn insert(&mut self, server: impl Into<String>, service: Arc<dyn RemoteToolService>) {
        self.servers.insert(server.into(), service);
    }

    /// Whether no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The qualified name under which `tool` on `server` is offered to a model.
    #[must_use]
    pub fn qualified_name(&self, server: &str, tool: &str) -> String {
        format!("{}{server}_{tool}", self.prefix)
    }

    /// Resolve a qualified tool name.
    #[must_use]
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<RemoteTarget<'a>> {
        let rest = name.strip_prefix(self.prefix.as_str())?;
        self.servers
            .iter()
            .filter_map(|(server, service)| {
                let tool = rest.strip_prefix(server.as_str())?.strip_prefix('_')?;
                (!tool.is_empty()).then_some(RemoteTarget {
                    server: server.as_str(),
                    tool,
                    service,
                })
            })
            .max_by_key(|target| target.server.len())
    }

    /// Definitions of every advertised remote tool, with qualified names.
    ///
    /// A server whose listing fails is skipped with a warning.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for (server, service) in &self.servers {
            match service.list_tools().await {
                Ok(tools) => defs.extend(tools.into_iter().map(|mut def| {
                    def.name = self.qualified_name(server, &def.name);
                    def
                })),
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "listing remote tools failed");
                }
            }
        }
        defs
    }
}

impl Default for RemoteToolRouter {
    fn default() -> Self {
        Self::new()
    }
}
