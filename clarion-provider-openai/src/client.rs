//! Chat Completions client struct and builder.

use std::future::Future;
use std::time::Duration;

use clarion_types::{
    Capabilities, ChatRequest, ChatResponse, ChatTransport, ProviderError, StreamHandle,
};
use tokio_util::sync::CancellationToken;

use crate::error::{map_http_status, map_reqwest_error};
use crate::mapping::{from_api_response, to_api_request};
use crate::streaming::stream_completion;

/// Default model used when none is specified on the request.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default OpenAI API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default local Ollama OpenAI-compatible base URL.
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Client for any OpenAI-compatible Chat Completions endpoint.
///
/// Implements [`ChatTransport`].
///
/// # Example
///
/// ```no_run
/// use clarion_provider_openai::OpenAiCompat;
///
/// let client = OpenAiCompat::new()
///     .base_url("http://localhost:8080/v1")
///     .with_provider_key("llamacpp")
///     .model("qwen2.5-7b-instruct");
/// ```
pub struct OpenAiCompat {
    /// Bearer token, omitted for local backends.
    pub(crate) api_key: Option<String>,
    /// Default model identifier used when the request does not specify one.
    pub(crate) model: String,
    /// API base URL, including any version prefix such as `/v1`.
    pub(crate) base_url: String,
    /// Key that scopes provider state such as the tool blacklist.
    pub(crate) provider_key: String,
    /// Optional organization ID for multi-org accounts.
    pub(crate) organization: Option<String>,
    /// Reported backend capabilities.
    pub(crate) capabilities: Capabilities,
    /// Request timeout; for streams it bounds only the wait for headers.
    pub(crate) timeout: Option<Duration>,
    /// Shared HTTP client.
    pub(crate) client: reqwest::Client,
}

impl OpenAiCompat {
    /// Create a client for the OpenAI API without credentials.
    ///
    /// Default model: `gpt-4o-mini`.
    /// Default base URL: `https://api.openai.com/v1`.
    /// Default provider key: `openai`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            provider_key: "openai".into(),
            organization: None,
            capabilities: Capabilities::default(),
            timeout: None,
            client: reqwest::Client::new(),
        }
    }

    /// Create a client for the OpenAI API with the given key.
    #[must_use]
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new().api_key(api_key)
    }

    /// Create a client for a local Ollama server's OpenAI-compatible endpoint.
    ///
    /// Default model: `llama3.2`. Provider key: `ollama`.
    #[must_use]
    pub fn ollama() -> Self {
        Self::new()
            .base_url(OLLAMA_BASE_URL)
            .with_provider_key("ollama")
            .model("llama3.2")
    }

    /// Create a client from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and
    /// `OPENAI_MODEL`. Unset variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut client = Self::new();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            client = client.api_key(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            client = client.base_url(url);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            client = client.model(model);
        }
        client
    }

    /// Set the bearer token.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the default model.
    ///
    /// This is used when [`ChatRequest::model`] is empty.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the API base URL.
    ///
    /// Useful for testing with a local mock server, a proxy, or a
    /// self-hosted backend.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the key that scopes provider state such as the tool blacklist.
    #[must_use]
    pub fn with_provider_key(mut self, key: impl Into<String>) -> Self {
        self.provider_key = key.into();
        self
    }

    /// Set the OpenAI organization ID.
    ///
    /// Sent as the `OpenAI-Organization` header on every request.
    #[must_use]
    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Declare what the backend supports.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set a request timeout.
    ///
    /// A unary request must complete, body included, within `timeout`. A
    /// stream only has to return its response headers in time; the body
    /// may then run as long as the backend keeps sending. Use the
    /// cancellation token to bound a stream's total length.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the chat completions endpoint URL.
    pub(crate) fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, body: &serde_json::Value, stream: bool) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.completions_url())
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        if !stream && let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

impl Default for OpenAiCompat {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTransport for OpenAiCompat {
    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Send a request with `stream: false` and map the response back.
    fn send(
        &self,
        request: ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, ProviderError>> + Send {
        let body = to_api_request(&request, &self.model, false);
        let builder = self.post(&body, false);
        let timeout = self.timeout;

        async move {
            tracing::debug!(
                model = %body["model"],
                tools = request.tools.len(),
                messages = request.messages.len(),
                "sending chat completion request"
            );

            let response = builder
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, timeout))?;

            let status = response.status();
            let response_text = response
                .text()
                .await
                .map_err(|e| map_reqwest_error(e, timeout))?;

            if !status.is_success() {
                return Err(map_http_status(status, &response_text));
            }

            let json: serde_json::Value = serde_json::from_str(&response_text).map_err(|e| {
                ProviderError::InvalidResponse(format!("invalid JSON response: {e}"))
            })?;

            from_api_response(&json)
        }
    }

    /// Send a request with `stream: true` and return a cancellable
    /// [`StreamHandle`].
    fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<StreamHandle, ProviderError>> + Send {
        let body = to_api_request(&request, &self.model, true);
        let builder = self.post(&body, true);
        let timeout = self.timeout;

        async move {
            tracing::debug!(
                model = %body["model"],
                tools = request.tools.len(),
                messages = request.messages.len(),
                "sending streaming chat completion request"
            );

            let headers = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, builder.send())
                        .await
                        .map_err(|_| ProviderError::Timeout(limit))?
                        .map_err(|e| map_reqwest_error(e, timeout)),
                    None => builder.send().await.map_err(|e| map_reqwest_error(e, timeout)),
                }
            };
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                sent = headers => sent?,
            };

            let status = response.status();
            if !status.is_success() {
                let body_text = response
                    .text()
                    .await
                    .map_err(|e| map_reqwest_error(e, timeout))?;
                return Err(map_http_status(status, &body_text));
            }

            Ok(stream_completion(response, cancel))
        }
    }
}
