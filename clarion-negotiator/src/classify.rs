//! Classification of backend rejections.

use clarion_types::{ApiError, ProviderError, Rejection, RejectionKind};
use regex::Regex;

/// Decides whether a failed request was rejected because of a tool schema,
/// because of the message content, or for an unrelated reason.
pub trait ErrorClassifier: Send + Sync {
    /// Classify a transport error.
    fn classify(&self, error: &ProviderError) -> Rejection;
}

/// Error codes that share `invalid_request_error` but have nothing to do
/// with tools.
const UNRELATED_CODES: &[&str] = &[
    "context_length_exceeded",
    "model_not_found",
    "rate_limit_exceeded",
    "insufficient_quota",
    "string_above_max_length",
];

/// Default classifier for OpenAI-compatible backends.
///
/// Structured fields are consulted first: the `invalid_function_parameters`
/// code and a `param` such as `tools[2].function.parameters`. A `param`
/// naming any other request field, such as `temperature`, is unrelated to
/// tools. Message signatures are the fallback, for backends that only
/// report text:
///
/// - `tools[N]` anywhere in the message gives the tool index
/// - "Invalid schema for function", "array schema missing items" mark a
///   schema rejection without an index
/// - "does not support tools" and `messages[N]` references mark a format
///   rejection, as do complaints about images on a 4xx response
/// - a bare `invalid_request_error` type counts as a schema rejection unless
///   its code is a known unrelated one
///
/// Only [`ProviderError::Api`] and [`ProviderError::StreamError`] are
/// inspected. Everything else is [`RejectionKind::Other`].
pub struct SignatureClassifier {
    tool_index: Regex,
    message_index: Regex,
    validation: Vec<Regex>,
    format: Vec<Regex>,
    image: Regex,
}

impl SignatureClassifier {
    /// Create a classifier with the built-in signatures.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool_index: Regex::new(r"tools(?:\[(\d+)\]|\.(\d+))").expect("valid regex"),
            message_index: Regex::new(r"messages(?:\[(\d+)\]|\.(\d+))").expect("valid regex"),
            validation: vec![
                Regex::new(r"(?i)invalid schema for function").expect("valid regex"),
                Regex::new(r"(?i)array schema missing items").expect("valid regex"),
                Regex::new(r"(?i)invalid_function_parameters").expect("valid regex"),
            ],
            format: vec![
                Regex::new(r"(?i)does not support tools").expect("valid regex"),
            ],
            image: Regex::new(r"(?i)\bimage(?:_url|s)?\b").expect("valid regex"),
        }
    }

    /// Add a message pattern that marks a tool schema rejection.
    #[must_use]
    pub fn with_validation_signature(mut self, pattern: Regex) -> Self {
        self.validation.push(pattern);
        self
    }

    /// Add a message pattern that marks a message format rejection.
    #[must_use]
    pub fn with_format_signature(mut self, pattern: Regex) -> Self {
        self.format.push(pattern);
        self
    }

    fn index_in(re: &Regex, text: &str) -> Option<usize> {
        let caps = re.captures(text)?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn classify_api(&self, api: &ApiError) -> Rejection {
        let param = api.param.as_deref().unwrap_or_default();
        let message = api.message.as_str();

        let tool_index =
            Self::index_in(&self.tool_index, param).or_else(|| Self::index_in(&self.tool_index, message));
        let validation = |tool_index| Rejection {
            kind: RejectionKind::Validation,
            tool_index,
        };
        let format = Rejection {
            kind: RejectionKind::Format,
            tool_index: None,
        };

        if api.code.as_deref() == Some("invalid_function_parameters") {
            return validation(tool_index);
        }
        if param.starts_with("tools") {
            return validation(tool_index);
        }
        if self.message_index.is_match(param) {
            return format;
        }
        if !param.is_empty() {
            return Rejection::OTHER;
        }
        if tool_index.is_some() || self.validation.iter().any(|re| re.is_match(message)) {
            return validation(tool_index);
        }
        let client_error = api.status.is_some_and(|status| (400..500).contains(&status));
        if self.message_index.is_match(message)
            || self.format.iter().any(|re| re.is_match(message))
            || (client_error && self.image.is_match(message))
        {
            return format;
        }
        if api.error_type.as_deref() == Some("invalid_request_error")
            && !api
                .code
                .as_deref()
                .is_some_and(|code| UNRELATED_CODES.contains(&code))
        {
            return validation(None);
        }
        Rejection::OTHER
    }
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for SignatureClassifier {
    fn classify(&self, error: &ProviderError) -> Rejection {
        match error {
            ProviderError::Api(api) => self.classify_api(api),
            ProviderError::StreamError(text) => self.classify_api(&ApiError {
                message: text.clone(),
                ..ApiError::default()
            }),
            _ => Rejection::OTHER,
        }
    }
}
