//! Conversation messages, tool definitions, tool calls and tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Placeholder shown when a tool result cannot be rendered as text.
pub const UNSERIALIZABLE_RESULT: &str = "[unserializable tool result]";

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// Human user.
    User,
    /// AI assistant.
    Assistant,
    /// Result of a tool invocation.
    Tool,
}

/// A message in a conversation.
///
/// Messages are appended to a conversation and never mutated once they
/// have been sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
    /// Base64-encoded images attached to the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Tool invocations requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For tool messages, the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages, the name of the tool that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system message.
    ///
    /// # Example
    ///
    /// ```
    /// use clarion_types::Message;
    /// let msg = Message::system("You are a helpful assistant.");
    /// ```
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create an assistant message with text only.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create an assistant message that records the tool calls it requested.
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Create a tool-result message answering the call with `tool_call_id`.
    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Attach base64-encoded images to this message.
    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

// --- Tool definitions ---

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name.
    pub name: String,
    /// JSON type name (`string`, `number`, `array`, ...).
    #[serde(rename = "type")]
    pub param_type: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the model must supply this parameter.
    #[serde(default)]
    pub required: bool,
    /// Item schema for `array` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl ToolParameter {
    /// Create an optional parameter.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            items: None,
        }
    }

    /// Mark the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the item schema of an `array` parameter.
    #[must_use]
    pub fn items(mut self, items: Value) -> Self {
        self.items = Some(items);
        self
    }
}

/// Definition of a tool the model may invoke.
///
/// Owned by the caller; the orchestration core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name (unique identifier).
    pub name: String,
    /// Description of what the tool does.
    pub description: String,
    /// Declared parameters, in declaration order.
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    /// Create a definition with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Names of the parameters the model must supply.
    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    /// Render the parameters as a JSON Schema object.
    ///
    /// The schema is rendered as declared. A malformed declaration (for
    /// example an `array` without `items`) is passed through untouched.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(p.param_type.clone()));
            if !p.description.is_empty() {
                prop.insert("description".into(), Value::String(p.description.clone()));
            }
            if let Some(items) = &p.items {
                prop.insert("items".into(), items.clone());
            }
            properties.insert(p.name.clone(), Value::Object(prop));
        }
        let required: Vec<Value> = self
            .required_parameters()
            .map(|n| Value::String(n.to_string()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Build a definition from a JSON Schema object such as one produced by
    /// `schemars` or advertised by a remote tool server.
    ///
    /// Only top-level properties are read. A property whose `type` is a list
    /// (e.g. `["string", "null"]`) takes its first non-null entry.
    #[must_use]
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Value,
    ) -> Self {
        let required: Vec<&str> = schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let parameters = schema["properties"]
            .as_object()
            .map(|props| {
                props
                    .iter()
                    .map(|(prop_name, prop)| ToolParameter {
                        name: prop_name.clone(),
                        param_type: schema_type_name(&prop["type"]),
                        description: prop["description"].as_str().unwrap_or_default().to_string(),
                        required: required.contains(&prop_name.as_str()),
                        items: prop.get("items").cloned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

fn schema_type_name(ty: &Value) -> String {
    match ty {
        Value::String(s) => s.clone(),
        Value::Array(options) => options
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("string")
            .to_string(),
        _ => "string".to_string(),
    }
}

// --- Tool calls and results ---

/// A model-requested tool invocation.
///
/// `arguments_raw` is the JSON argument text exactly as produced by the
/// model. It is only meaningful once it parses as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call identifier, unique within a response.
    pub id: String,
    /// Name of the tool to invoke.
    pub function_name: String,
    /// Raw JSON argument text.
    pub arguments_raw: String,
}

impl ToolCallRequest {
    /// Create a tool call request.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments_raw: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            arguments_raw: arguments_raw.into(),
        }
    }

    /// Parse the raw argument text.
    pub fn arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments_raw)
    }

    /// Whether this call may be dispatched: it has a name and its
    /// arguments are non-empty, valid JSON.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        !self.function_name.trim().is_empty()
            && !self.arguments_raw.trim().is_empty()
            && self.arguments().is_ok()
    }
}

/// The payload produced by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolResultPayload {
    /// Plain text.
    Text(String),
    /// Base64-encoded image data.
    Image {
        /// Base64-encoded bytes.
        data: String,
        /// MIME type, e.g. `image/png`.
        media_type: String,
    },
    /// Arbitrary structured JSON.
    StructuredData(Value),
}

impl ToolResultPayload {
    /// Decode a JSON value returned by a tool.
    ///
    /// - a string becomes [`Text`](Self::Text)
    /// - an object with a `content` array of typed blocks is decoded as a
    ///   content-block result (see [`from_content_blocks`](Self::from_content_blocks)),
    ///   unless it carries `structuredContent`, which wins
    /// - a single `{"type": "image", "data", "mimeType"}` block becomes
    ///   [`Image`](Self::Image)
    /// - anything else is [`StructuredData`](Self::StructuredData)
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Object(ref obj) => {
                if let Some(structured) = obj.get("structuredContent")
                    && !structured.is_null()
                {
                    return Self::StructuredData(structured.clone());
                }
                if let Some(Value::Array(blocks)) = obj.get("content")
                    && blocks.iter().all(|b| b.get("type").is_some())
                {
                    return Self::from_content_blocks(blocks);
                }
                if let Some(image) = image_block(&value) {
                    return image;
                }
                Self::StructuredData(value)
            }
            other => Self::StructuredData(other),
        }
    }

    /// Decode a list of typed content blocks.
    ///
    /// All-text blocks are joined with newlines. A lone image block becomes
    /// an image. Mixed or unknown blocks are kept as structured data.
    #[must_use]
    pub fn from_content_blocks(blocks: &[Value]) -> Self {
        if blocks.is_empty() {
            return Self::Text(String::new());
        }
        let texts: Option<Vec<&str>> = blocks
            .iter()
            .map(|b| match b["type"].as_str() {
                Some("text") => b["text"].as_str(),
                _ => None,
            })
            .collect();
        if let Some(texts) = texts {
            return Self::Text(texts.join("\n"));
        }
        if let [single] = blocks
            && let Some(image) = image_block(single)
        {
            return image;
        }
        Self::StructuredData(Value::Array(blocks.to_vec()))
    }

    /// Render the payload as display-safe text for the next conversation
    /// turn. Never fails.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Image { data, media_type } => {
                format!("[image: {media_type}, {} bytes base64]", data.len())
            }
            Self::StructuredData(Value::String(s)) => s.clone(),
            Self::StructuredData(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| UNSERIALIZABLE_RESULT.to_string())
            }
        }
    }
}

fn image_block(block: &Value) -> Option<ToolResultPayload> {
    if block["type"].as_str() != Some("image") {
        return None;
    }
    let data = block["data"].as_str()?;
    let media_type = block["mimeType"]
        .as_str()
        .or_else(|| block["media_type"].as_str())
        .unwrap_or("application/octet-stream");
    Some(ToolResultPayload::Image {
        data: data.to_string(),
        media_type: media_type.to_string(),
    })
}

/// The uniform record of one tool execution.
///
/// When `success` is true `result` is meaningful, otherwise `error` is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Name of the tool that was called.
    pub tool_name: String,
    /// Id of the call this result answers.
    pub tool_call_id: String,
    /// Whether the tool completed successfully.
    pub success: bool,
    /// The tool's output when successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResultPayload>,
    /// The failure description when unsuccessful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution metadata (source, duration).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolExecutionResult {
    /// A successful result for `call`.
    #[must_use]
    pub fn success(call: &ToolCallRequest, payload: ToolResultPayload) -> Self {
        Self {
            tool_name: call.function_name.clone(),
            tool_call_id: call.id.clone(),
            success: true,
            result: Some(payload),
            error: None,
            metadata: None,
        }
    }

    /// A failed result for `call`.
    #[must_use]
    pub fn failure(call: &ToolCallRequest, error: impl Into<String>) -> Self {
        Self {
            tool_name: call.function_name.clone(),
            tool_call_id: call.id.clone(),
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Attach execution metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Text to feed back to the model for this result. Never fails.
    #[must_use]
    pub fn display_content(&self) -> String {
        if self.success {
            self.result
                .as_ref()
                .map(ToolResultPayload::to_display_string)
                .unwrap_or_default()
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("tool execution failed")
            )
        }
    }
}

/// Runtime context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Session identifier.
    pub session_id: String,
    /// Token for cooperative cancellation.
    pub cancellation_token: CancellationToken,
}

// --- Requests and responses ---

/// Sampling options for a chat request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

/// Response format constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseFormat {
    /// Free-form JSON object.
    JsonObject,
    /// JSON constrained by a schema.
    JsonSchema {
        /// Schema name.
        name: String,
        /// The JSON Schema.
        schema: Value,
        /// Whether the backend should enforce the schema strictly.
        strict: bool,
    },
}

/// A chat-completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model identifier.
    pub model: String,
    /// The conversation so far.
    pub messages: Vec<Message>,
    /// Sampling options.
    pub options: ChatOptions,
    /// Tools offered to the model.
    pub tools: Vec<ToolDefinition>,
    /// Response format constraint.
    pub response_format: Option<ResponseFormat>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// Natural end.
    Stop,
    /// The model requested tool calls.
    ToolCalls,
    /// Hit the token limit.
    Length,
    /// Content was filtered.
    ContentFilter,
    /// Any other backend-specific reason.
    Other(String),
}

impl FinishReason {
    /// Map a wire-level finish reason string.
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub input_tokens: usize,
    /// Tokens in the completion.
    pub output_tokens: usize,
}

impl TokenUsage {
    /// Add another usage record into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A complete (unary) chat-completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider-assigned response id.
    pub id: String,
    /// The model that generated the response.
    pub model: String,
    /// The assistant message.
    pub message: Message,
    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
    /// Token usage, when reported.
    pub usage: Option<TokenUsage>,
}

/// What a chat backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Native function/tool calling.
    pub native_tools: bool,
    /// JSON-schema constrained output.
    pub json_schema: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            native_tools: true,
            json_schema: true,
        }
    }
}

// --- Blacklist ---

/// A tool known to be rejected by a provider.
///
/// Identity is `(provider_key, tool_name, description_hash)`: the same tool
/// offered to a different provider, or with a changed definition, is
/// evaluated independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// Provider the rejection was observed on.
    pub provider_key: String,
    /// Rejected tool name.
    pub tool_name: String,
    /// Fingerprint of the rejected definition.
    pub description_hash: String,
    /// The backend's rejection message.
    pub reason: String,
    /// When the rejection was recorded.
    pub timestamp: DateTime<Utc>,
}

impl BlacklistEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(
        provider_key: impl Into<String>,
        tool_name: impl Into<String>,
        description_hash: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provider_key: provider_key.into(),
            tool_name: tool_name.into(),
            description_hash: description_hash.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether two entries share the same identity key.
    #[must_use]
    pub fn same_key(&self, other: &BlacklistEntry) -> bool {
        self.provider_key == other.provider_key
            && self.tool_name == other.tool_name
            && self.description_hash == other.description_hash
    }
}
