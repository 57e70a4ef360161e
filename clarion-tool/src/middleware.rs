//! Hooks around native tool execution.
//!
//! A [`ToolMiddleware`] sees a call after its argument text has been parsed
//! and before the tool runs, and sees the [`ToolResultPayload`] the tool
//! produced. It continues with [`Next::run`] or answers on the tool's
//! behalf. Remote calls bypass this chain.

use std::sync::Arc;

use clarion_types::{
    BoxFuture, ToolCallRequest, ToolContext, ToolDyn, ToolError, ToolResultPayload,
};

/// A native call with its arguments already decoded.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Call identifier from the model.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Decoded arguments.
    pub input: serde_json::Value,
}

impl ToolCall {
    /// Decode the raw argument text of a model-issued call.
    pub fn from_request(request: &ToolCallRequest) -> Result<Self, ToolError> {
        let input = request
            .arguments()
            .map_err(|e| ToolError::InvalidInput(format!("arguments are not valid JSON: {e}")))?;
        Ok(Self {
            id: request.id.clone(),
            name: request.function_name.clone(),
            input,
        })
    }
}

/// One layer around a native tool.
///
/// Returning an error here is reported to the model exactly like an error
/// from the tool itself: as a failed
/// [`ToolExecutionResult`](clarion_types::ToolExecutionResult).
pub trait ToolMiddleware: Send + Sync {
    /// Handle `call`, usually by awaiting `next.run(call, ctx)`.
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        ctx: &'a ToolContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>>;
}

/// The layers not yet run, ending in the tool.
pub struct Next<'a> {
    tool: &'a dyn ToolDyn,
    middleware: &'a [Arc<dyn ToolMiddleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(tool: &'a dyn ToolDyn, middleware: &'a [Arc<dyn ToolMiddleware>]) -> Self {
        Self { tool, middleware }
    }

    /// Hand the call to the next layer, or to the tool once none remain.
    pub async fn run(
        self,
        call: &'a ToolCall,
        ctx: &'a ToolContext,
    ) -> Result<ToolResultPayload, ToolError> {
        match self.middleware.split_first() {
            Some((layer, rest)) => layer.process(call, ctx, Next::new(self.tool, rest)).await,
            None => self.tool.call_dyn(call.input.clone(), ctx).await,
        }
    }
}

struct FnMiddleware<F>(F);

impl<F> ToolMiddleware for FnMiddleware<F>
where
    F: for<'a> Fn(
            &'a ToolCall,
            &'a ToolContext,
            Next<'a>,
        ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>>
        + Send
        + Sync,
{
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        ctx: &'a ToolContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        (self.0)(call, ctx, next)
    }
}

/// Middleware from a closure returning `Box::pin(async move { ... })`.
///
/// ```ignore
/// registry.add_tool_middleware(
///     "search",
///     tool_middleware_fn(|call, ctx, next| {
///         Box::pin(async move {
///             if call.input["q"].as_str().is_some_and(str::is_empty) {
///                 return Ok(ToolResultPayload::Text("nothing to search for".into()));
///             }
///             next.run(call, ctx).await
///         })
///     }),
/// );
/// ```
#[must_use]
pub fn tool_middleware_fn<F>(f: F) -> impl ToolMiddleware
where
    F: for<'a> Fn(
            &'a ToolCall,
            &'a ToolContext,
            Next<'a>,
        ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>>
        + Send
        + Sync,
{
    FnMiddleware(f)
}
