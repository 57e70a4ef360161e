//! Streaming delta types for incremental chat responses.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::{FinishReason, TokenUsage};

/// An incremental fragment of a tool call.
///
/// Any field may be absent; fragments are merged by the tool-call assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the response, when the backend sends one.
    pub index: Option<usize>,
    /// Call identifier. Usually present only on the first fragment.
    pub id: Option<String>,
    /// Function name fragment.
    pub name: Option<String>,
    /// Argument JSON fragment, appended verbatim.
    pub arguments: Option<String>,
}

/// One decoded streaming frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    /// Incremental text content.
    pub content: Option<String>,
    /// Incremental tool-call fragments.
    pub tool_calls: Vec<ToolCallDelta>,
    /// Terminal finish reason, on the last content frame.
    pub finish_reason: Option<FinishReason>,
    /// Terminal usage statistics.
    pub usage: Option<TokenUsage>,
}

impl DeltaEvent {
    /// A frame carrying only text.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Whether the frame carries nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.tool_calls.is_empty()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

/// Handle to a streaming chat response.
///
/// The stream is lazy, single-consumer and forward-only. It ends after a
/// hard error; a cancelled stream yields [`ProviderError::Cancelled`] as
/// its last item.
pub struct StreamHandle {
    /// The stream of delta frames. Consume with `StreamExt::next()`.
    pub receiver: Pin<Box<dyn Stream<Item = Result<DeltaEvent, ProviderError>> + Send>>,
}

impl StreamHandle {
    /// Wrap any compatible stream.
    pub fn new(
        stream: impl Stream<Item = Result<DeltaEvent, ProviderError>> + Send + 'static,
    ) -> Self {
        Self {
            receiver: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}
