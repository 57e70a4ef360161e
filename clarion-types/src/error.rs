//! Error types for all clarion crates.

use std::time::Duration;

/// A structured error reported by a chat backend.
///
/// Fields mirror the OpenAI-style `{"error": {message, type, code, param}}`
/// body. Backends that only return text populate `message`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status, absent for errors reported inside a stream.
    pub status: Option<u16>,
    /// Human-readable message.
    pub message: String,
    /// Error type, e.g. `invalid_request_error`.
    pub error_type: Option<String>,
    /// Machine-readable error code, e.g. `invalid_function_parameters`.
    pub code: Option<String>,
    /// The request field the error refers to, e.g. `tools[2].function.parameters`.
    pub param: Option<String>,
}

impl ApiError {
    /// Decode an error body.
    ///
    /// Accepts `{"error": {...}}`, `{"error": "text"}`, a bare `{...}` error
    /// object, or plain text.
    #[must_use]
    pub fn from_body(status: Option<u16>, body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(json) => Self::from_json(status, &json),
            Err(_) => Self {
                status,
                message: body.trim().to_string(),
                ..Self::default()
            },
        }
    }

    /// Decode an already-parsed error payload.
    #[must_use]
    pub fn from_json(status: Option<u16>, json: &serde_json::Value) -> Self {
        let err = match json.get("error") {
            Some(inner) => inner,
            None => json,
        };
        if let Some(text) = err.as_str() {
            return Self {
                status,
                message: text.to_string(),
                ..Self::default()
            };
        }
        let field = |name: &str| -> Option<String> {
            match &err[name] {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        Self {
            status,
            message: field("message").unwrap_or_else(|| err.to_string()),
            error_type: field("type"),
            code: field("code"),
            param: field("param"),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(status) = self.status {
            write!(f, "HTTP {status}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {code})")?;
        }
        Ok(())
    }
}

/// Errors from chat transport operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    // Retryable errors
    /// Network-level error (connection reset, DNS failure, etc.).
    #[error("network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Rate limited by the provider.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit {
        /// Suggested retry delay, if provided by the API.
        retry_after: Option<Duration>,
    },
    /// Request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    /// Provider service is temporarily unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Terminal errors
    /// Authentication/authorization failure.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Requested model does not exist.
    #[error("model not found: {0}")]
    ModelNotFound(String),
    /// The backend rejected the request.
    #[error("api error: {0}")]
    Api(ApiError),
    /// The backend answered with something that could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The stream broke while reading.
    #[error("stream error: {0}")]
    StreamError(String),
    /// The request was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether this error is likely transient and the request can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::RateLimit { .. }
                | Self::Timeout(_)
                | Self::ServiceUnavailable(_)
                | Self::StreamError(_)
        )
    }

    /// The structured backend error, if this is one.
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }
}

/// How a backend rejection relates to the request's tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// A tool schema was rejected.
    Validation,
    /// The request was rejected for its message content (e.g. an image on a
    /// role that forbids it), not for any tool.
    Format,
    /// Unrelated to tools or message shape.
    Other,
}

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// The failure category.
    pub kind: RejectionKind,
    /// Index of the offending tool in the request, when the backend names one.
    pub tool_index: Option<usize>,
}

impl Rejection {
    /// A non-tool failure.
    pub const OTHER: Rejection = Rejection {
        kind: RejectionKind::Other,
        tool_index: None,
    };
}

/// Errors from tool operations.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Tool not found in registry.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// Invalid input for the tool.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Tool execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Tool execution exceeded its time limit.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Tool execution was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Errors from blacklist storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// I/O error during storage operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other storage error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from adaptive tool negotiation.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The backend failed for a reason unrelated to tool schemas.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    /// The request was still rejected with every tool removed, so the
    /// message content itself is malformed.
    #[error("message format rejected after {attempts} attempts: {source}")]
    MessageFormat {
        /// Attempts made.
        attempts: usize,
        /// The final rejection.
        #[source]
        source: ProviderError,
    },
    /// The attempt ceiling was reached.
    #[error("tool negotiation exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// The last rejection seen.
        #[source]
        last: ProviderError,
    },
}

impl NegotiationError {
    /// Whether the caller may reasonably try the same turn again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::MessageFormat { .. } | Self::Exhausted { .. } => false,
        }
    }

    /// Whether this error is a caller-initiated cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::Cancelled))
    }
}
