//! Core traits: ChatTransport, Tool, ToolDyn, BlacklistStore, RemoteToolService.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, StorageError, ToolError};
use crate::stream::StreamHandle;
use crate::types::{
    BlacklistEntry, Capabilities, ChatRequest, ChatResponse, ToolContext, ToolDefinition,
    ToolResultPayload,
};

/// A boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wire-level chat client. Implement this for each backend.
///
/// Uses RPITIT (return position impl trait in trait). Not object-safe by
/// design; compose with generics `<T: ChatTransport>`.
///
/// # Example
///
/// ```ignore
/// struct MyBackend;
///
/// impl ChatTransport for MyBackend {
///     fn provider_key(&self) -> &str { "my-backend" }
///
///     fn send(&self, request: ChatRequest)
///         -> impl Future<Output = Result<ChatResponse, ProviderError>> + Send
///     {
///         async { todo!() }
///     }
///
///     fn stream(&self, request: ChatRequest, cancel: CancellationToken)
///         -> impl Future<Output = Result<StreamHandle, ProviderError>> + Send
///     {
///         async { todo!() }
///     }
/// }
/// ```
pub trait ChatTransport: Send + Sync {
    /// Identifies the backend for provider-scoped state such as the tool
    /// blacklist. Two transports with the same key share rejections.
    fn provider_key(&self) -> &str;

    /// What this backend supports. Defaults to everything.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Send a request and wait for the complete response.
    fn send(
        &self,
        request: ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, ProviderError>> + Send;

    /// Send a request and return a lazy stream of delta frames.
    ///
    /// `cancel` is observed before every read; once triggered the
    /// connection is dropped and the stream yields
    /// [`ProviderError::Cancelled`].
    fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<StreamHandle, ProviderError>> + Send;
}

/// Strongly-typed tool trait. Implement this for your tools.
///
/// The blanket impl of [`ToolDyn`] handles JSON deserialization and
/// result decoding so you work with concrete Rust types.
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    const NAME: &'static str;
    /// The deserialized input type.
    type Args: DeserializeOwned + Send;
    /// The serializable output type.
    type Output: Serialize;
    /// The tool-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Returns the tool definition (name, description, parameters).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with typed arguments.
    fn call(
        &self,
        args: Self::Args,
        ctx: &ToolContext,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Type-erased tool for dynamic dispatch. Blanket-implemented for all [`Tool`] impls.
///
/// This enables heterogeneous collections (`HashMap<String, Arc<dyn ToolDyn>>`).
pub trait ToolDyn: Send + Sync {
    /// The tool's unique name.
    fn name(&self) -> &str;
    /// The tool definition.
    fn definition(&self) -> ToolDefinition;
    /// Execute the tool with a JSON value input.
    fn call_dyn<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: &'a ToolContext,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>>;
}

impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn call_dyn<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: &'a ToolContext,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        Box::pin(async move {
            let args: T::Args = serde_json::from_value(input)
                .map_err(|e| ToolError::InvalidInput(e.to_string()))?;

            let output = self
                .call(args, ctx)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string().into()))?;

            let value = serde_json::to_value(&output)
                .map_err(|e| ToolError::ExecutionFailed(Box::new(e)))?;

            Ok(ToolResultPayload::from_value(value))
        })
    }
}

/// Provider-scoped persistence for rejected tools.
///
/// Implementations must make [`put`](Self::put) idempotent: storing an
/// entry whose `(provider_key, tool_name, description_hash)` already
/// exists is a no-op.
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    /// All entries recorded for a provider. Unknown providers yield an
    /// empty list.
    async fn get(&self, provider_key: &str) -> Result<Vec<BlacklistEntry>, StorageError>;

    /// Record an entry. Returns `true` when it was newly stored.
    async fn put(&self, entry: BlacklistEntry) -> Result<bool, StorageError>;

    /// Remove entries for one provider, or for every provider when `None`.
    async fn clear(&self, provider_key: Option<&str>) -> Result<(), StorageError>;
}

/// An external tool server reachable by name, such as an MCP server.
#[async_trait]
pub trait RemoteToolService: Send + Sync {
    /// Tools the server advertises, with unprefixed names.
    ///
    /// Servers that cannot enumerate their tools return an empty list.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(Vec::new())
    }

    /// Invoke `tool` with JSON arguments and return the raw result value.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}
