//! Sequential execution of model-requested tool calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clarion_types::{
    RemoteToolService, ToolCallRequest, ToolContext, ToolDefinition, ToolError,
    ToolExecutionResult, ToolResultPayload,
};
use serde_json::json;

use crate::middleware::ToolCall;
use crate::registry::ToolRegistry;
use crate::remote::RemoteToolRouter;

/// Where a call was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Native,
    Remote,
    Unresolved,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Remote => "remote",
            Self::Unresolved => "unresolved",
        }
    }
}

/// Dispatches tool calls and normalizes their outcomes.
///
/// Resolution order for a call named `n`:
/// 1. a native tool registered under exactly `n`
/// 2. a remote service addressed by `n`'s prefix (see [`RemoteToolRouter`])
/// 3. a failed "tool not found" result
///
/// Execution never returns an error: every failure becomes a
/// [`ToolExecutionResult`] with `success: false`.
///
/// # Example
///
/// ```ignore
/// let engine = ToolExecutionEngine::new(Arc::new(registry))
///     .remote("github", Arc::new(github_service))
///     .tool_timeout(Duration::from_secs(60));
/// let results = engine.execute_all(&calls, &ctx).await;
/// ```
pub struct ToolExecutionEngine {
    registry: Arc<ToolRegistry>,
    remote: RemoteToolRouter,
    tool_timeout: Option<Duration>,
}

impl ToolExecutionEngine {
    /// Create an engine over a native registry with no remote services and
    /// no per-call time limit.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            remote: RemoteToolRouter::new(),
            tool_timeout: None,
        }
    }

    /// Register a remote tool service under `server`.
    #[must_use]
    pub fn remote(mut self, server: impl Into<String>, service: Arc<dyn RemoteToolService>) -> Self {
        self.remote.insert(server, service);
        self
    }

    /// Override the remote name prefix (default `mcp_`).
    #[must_use]
    pub fn remote_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.remote = self.remote.with_prefix(prefix);
        self
    }

    /// Bound every call by `timeout`. Off by default.
    #[must_use]
    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// The native registry.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Every tool this engine can dispatch: native definitions first, then
    /// advertised remote tools under their qualified names.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.registry.definitions();
        defs.extend(self.remote.definitions().await);
        defs
    }

    /// Execute one call.
    pub async fn execute(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolExecutionResult {
        let started = Instant::now();
        let (source, server, outcome) = self.dispatch(call, ctx).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(payload) => {
                tracing::debug!(
                    tool = %call.function_name,
                    source = source.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tool call succeeded"
                );
                ToolExecutionResult::success(call, payload)
            }
            Err(e) => {
                tracing::warn!(
                    tool = %call.function_name,
                    source = source.as_str(),
                    error = %e,
                    "tool call failed"
                );
                ToolExecutionResult::failure(call, e.to_string())
            }
        };

        let mut metadata = json!({
            "source": source.as_str(),
            "duration_ms": elapsed.as_millis() as u64,
        });
        if let Some(server) = server {
            metadata["server"] = json!(server);
        }
        result.with_metadata(metadata)
    }

    /// Execute calls one after another, in order.
    ///
    /// Once `ctx.cancellation_token` fires no further call is started; the
    /// results gathered so far are returned.
    pub async fn execute_all(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ToolContext,
    ) -> Vec<ToolExecutionResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if ctx.cancellation_token.is_cancelled() {
                tracing::debug!(
                    remaining = calls.len() - results.len(),
                    "cancelled, skipping remaining tool calls"
                );
                break;
            }
            results.push(self.execute(call, ctx).await);
        }
        results
    }

    async fn dispatch(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext,
    ) -> (Source, Option<String>, Result<ToolResultPayload, ToolError>) {
        let tool_call = match ToolCall::from_request(call) {
            Ok(tool_call) => tool_call,
            Err(e) => return (Source::Unresolved, None, Err(e)),
        };

        if self.registry.contains(&call.function_name) {
            let outcome = self
                .bounded(self.registry.execute(&tool_call, ctx))
                .await;
            return (Source::Native, None, outcome);
        }

        if let Some(target) = self.remote.resolve(&call.function_name) {
            let server = target.server.to_string();
            let outcome = self
                .bounded(async {
                    target
                        .service
                        .call_tool(target.tool, tool_call.input)
                        .await
                        .map(ToolResultPayload::from_value)
                })
                .await;
            return (Source::Remote, Some(server), outcome);
        }

        (
            Source::Unresolved,
            None,
            Err(ToolError::NotFound(call.function_name.clone())),
        )
    }

    async fn bounded<F>(&self, fut: F) -> Result<ToolResultPayload, ToolError>
    where
        F: std::future::Future<Output = Result<ToolResultPayload, ToolError>>,
    {
        match self.tool_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(ToolError::Timeout(limit))),
            None => fut.await,
        }
    }
}
