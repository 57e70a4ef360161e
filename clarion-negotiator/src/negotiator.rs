//! The negotiation loop.

use std::future::Future;
use std::sync::Arc;

use clarion_types::{
    ChatRequest, ChatResponse, ChatTransport, NegotiationError, ProviderError, RejectionKind,
    StreamHandle, ToolDefinition,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::blacklist::Blacklist;
use crate::classify::{ErrorClassifier, SignatureClassifier};

/// Limits for [`AdaptiveToolNegotiator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatorConfig {
    /// Total requests sent for one call before giving up.
    pub max_attempts: usize,
    /// Requests sent with every tool stripped before the message content
    /// itself is blamed.
    pub max_format_retries: usize,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_format_retries: 1,
        }
    }
}

/// A successful negotiated call.
#[derive(Debug)]
pub struct Negotiated<T> {
    /// The transport's result.
    pub value: T,
    /// Tools included in the request that succeeded.
    pub tools_sent: Vec<ToolDefinition>,
    /// Names of tools removed during this call, in removal order.
    pub removed: Vec<String>,
    /// Requests sent, including the successful one.
    pub attempts: usize,
}

/// Wraps a [`ChatTransport`] and retries tool schema rejections.
///
/// Each attempt:
/// 1. drops tools blacklisted for this provider (re-read every attempt, so
///    rejections found by concurrent calls apply immediately)
/// 2. sends the request
/// 3. on a schema rejection, blacklists the named tool, or the first
///    remaining tool when the backend does not say which, and retries
///
/// A format rejection strips every tool for the retry without blacklisting
/// any. Once no tools are left and the backend still refuses,
/// [`NegotiationError::MessageFormat`] is returned. Any other failure is
/// returned as [`NegotiationError::Provider`] without retrying.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryBlacklistStore::new());
/// let negotiator = AdaptiveToolNegotiator::new(transport, Arc::new(Blacklist::new(store)));
/// let outcome = negotiator.send(request).await?;
/// println!("{} tools removed", outcome.removed.len());
/// ```
pub struct AdaptiveToolNegotiator<T: ChatTransport> {
    transport: T,
    blacklist: Arc<Blacklist>,
    classifier: Box<dyn ErrorClassifier>,
    config: NegotiatorConfig,
}

impl<T: ChatTransport> AdaptiveToolNegotiator<T> {
    /// Create a negotiator with the default classifier and limits.
    #[must_use]
    pub fn new(transport: T, blacklist: Arc<Blacklist>) -> Self {
        Self {
            transport,
            blacklist,
            classifier: Box::new(SignatureClassifier::new()),
            config: NegotiatorConfig::default(),
        }
    }

    /// Replace the error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Replace the limits.
    #[must_use]
    pub fn config(mut self, config: NegotiatorConfig) -> Self {
        self.config = config;
        self
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The shared blacklist.
    pub fn blacklist(&self) -> &Arc<Blacklist> {
        &self.blacklist
    }

    /// Send a unary request.
    pub async fn send(
        &self,
        request: ChatRequest,
    ) -> Result<Negotiated<ChatResponse>, NegotiationError> {
        self.negotiate(request, |req| self.transport.send(req)).await
    }

    /// Open a stream.
    ///
    /// Many backends accept the connection and report a schema rejection
    /// as the first frame, so the first item is read before the stream is
    /// handed back. An error there counts as a failed attempt; anything
    /// else is put back in front of the stream.
    pub async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<Negotiated<StreamHandle>, NegotiationError> {
        self.negotiate(request, |req| {
            let cancel = cancel.clone();
            async move {
                let mut handle = self.transport.stream(req, cancel).await?;
                match handle.receiver.next().await {
                    Some(Err(e)) => Err(e),
                    Some(Ok(first)) => Ok(StreamHandle::new(
                        futures::stream::once(futures::future::ready(Ok(first))).chain(handle.receiver),
                    )),
                    None => Ok(StreamHandle::new(futures::stream::empty())),
                }
            }
        })
        .await
    }

    async fn negotiate<R, F, Fut>(
        &self,
        request: ChatRequest,
        mut attempt_fn: F,
    ) -> Result<Negotiated<R>, NegotiationError>
    where
        F: FnMut(ChatRequest) -> Fut,
        Fut: Future<Output = Result<R, ProviderError>>,
    {
        let provider = self.transport.provider_key().to_string();
        let max_attempts = self.config.max_attempts.max(1);
        let mut candidates = request.tools.clone();
        let mut removed = Vec::new();
        let mut tools_stripped = false;
        let mut format_retries = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if !tools_stripped {
                candidates = self.blacklist.filter(&provider, &candidates).await;
            }
            let tools = if tools_stripped {
                Vec::new()
            } else {
                candidates.clone()
            };

            tracing::debug!(
                provider = %provider,
                attempt,
                tools = tools.len(),
                "sending negotiated request"
            );
            let mut req = request.clone();
            req.tools = tools.clone();

            let err = match attempt_fn(req).await {
                Ok(value) => {
                    return Ok(Negotiated {
                        value,
                        tools_sent: tools,
                        removed,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            let rejection = self.classifier.classify(&err);
            match rejection.kind {
                RejectionKind::Other => return Err(NegotiationError::Provider(err)),
                RejectionKind::Validation if !tools.is_empty() => {
                    let index = match rejection.tool_index {
                        Some(i) if i < candidates.len() => i,
                        other => {
                            tracing::info!(
                                provider = %provider,
                                reported = ?other,
                                "rejection names no usable tool index, removing the first tool"
                            );
                            0
                        }
                    };
                    let tool = candidates.remove(index);
                    self.blacklist.record(&provider, &tool, &err.to_string()).await;
                    removed.push(tool.name);
                }
                RejectionKind::Validation | RejectionKind::Format => {
                    if format_retries >= self.config.max_format_retries {
                        return Err(NegotiationError::MessageFormat {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    format_retries += 1;
                    tools_stripped = true;
                    tracing::info!(
                        provider = %provider,
                        error = %err,
                        "request rejected for its content, retrying without tools"
                    );
                }
            }

            if attempt >= max_attempts {
                return Err(NegotiationError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}
