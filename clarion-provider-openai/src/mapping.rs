//! Request/response mapping between clarion types and the Chat Completions wire format.
//!
//! Reference: <https://platform.openai.com/docs/api-reference/chat>

use clarion_types::{
    ApiError, ChatRequest, ChatResponse, FinishReason, Message, ProviderError, ResponseFormat,
    Role, TokenUsage, ToolCallRequest, ToolDefinition,
};
use serde_json::{Value, json};

// ─── Request mapping ─────────────────────────────────────────────────────────

/// Convert a [`ChatRequest`] into the Chat Completions JSON body.
///
/// An empty `request.model` falls back to `default_model`.
#[must_use]
pub fn to_api_request(req: &ChatRequest, default_model: &str, stream: bool) -> Value {
    let model = if req.model.is_empty() {
        default_model
    } else {
        req.model.as_str()
    };

    let mut body = json!({
        "model": model,
        "messages": req.messages.iter().map(map_message).collect::<Vec<_>>(),
        "stream": stream,
    });
    if stream {
        // Usage only arrives in a stream when asked for.
        body["stream_options"] = json!({"include_usage": true});
    }

    if let Some(temp) = req.options.temperature {
        body["temperature"] = Value::from(temp);
    }
    if let Some(top_p) = req.options.top_p {
        body["top_p"] = Value::from(top_p);
    }
    if let Some(max_tokens) = req.options.max_tokens {
        body["max_tokens"] = Value::from(max_tokens);
    }

    if !req.tools.is_empty() {
        body["tools"] = Value::Array(req.tools.iter().map(map_tool_definition).collect());
    }

    if let Some(format) = &req.response_format {
        body["response_format"] = map_response_format(format);
    }

    body
}

/// Map one [`Message`] to its wire form.
///
/// Images become `image_url` content parts on whatever role carries them;
/// backends that forbid images on a role reject the request.
fn map_message(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let content = if msg.images.is_empty() {
        Value::String(msg.content.clone())
    } else {
        let mut parts = Vec::with_capacity(msg.images.len() + 1);
        if !msg.content.is_empty() {
            parts.push(json!({"type": "text", "text": msg.content}));
        }
        for image in &msg.images {
            parts.push(json!({
                "type": "image_url",
                "image_url": {"url": image_url(image)},
            }));
        }
        Value::Array(parts)
    };

    let mut out = json!({"role": role, "content": content});

    if !msg.tool_calls.is_empty() {
        if msg.content.is_empty() {
            out["content"] = Value::Null;
        }
        out["tool_calls"] = Value::Array(
            msg.tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.function_name,
                            "arguments": call.arguments_raw,
                        },
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &msg.tool_call_id {
        out["tool_call_id"] = Value::String(id.clone());
    }
    if let Some(name) = &msg.name {
        out["name"] = Value::String(name.clone());
    }
    out
}

/// Raw base64 is wrapped into a data URL; URLs pass through.
fn image_url(image: &str) -> String {
    if image.starts_with("data:") || image.starts_with("http://") || image.starts_with("https://")
    {
        image.to_string()
    } else {
        format!("data:image/jpeg;base64,{image}")
    }
}

/// Map a [`ToolDefinition`] to the `{type: "function", function: {...}}` wire form.
#[must_use]
pub fn map_tool_definition(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema(),
        },
    })
}

fn map_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::JsonObject => json!({"type": "json_object"}),
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => json!({
            "type": "json_schema",
            "json_schema": {
                "name": name,
                "schema": schema,
                "strict": strict,
            },
        }),
    }
}

// ─── Response mapping ────────────────────────────────────────────────────────

/// Convert a unary Chat Completions response body into a [`ChatResponse`].
///
/// Also accepts Ollama's native `{"message": {...}, "done": true}` shape.
/// Tool calls are returned as sent; dispatchability is decided by the caller.
pub fn from_api_response(json: &Value) -> Result<ChatResponse, ProviderError> {
    if json.get("error").is_some_and(|e| !e.is_null()) {
        return Err(ProviderError::Api(ApiError::from_json(None, json)));
    }

    let (message_json, finish) = if let Some(choice) = json["choices"].get(0) {
        (&choice["message"], choice["finish_reason"].as_str())
    } else if json["message"].is_object() {
        (&json["message"], json["done_reason"].as_str())
    } else {
        return Err(ProviderError::InvalidResponse(
            "response has neither choices nor message".into(),
        ));
    };

    let content = message_json["content"].as_str().unwrap_or_default();
    let tool_calls = message_json["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| ToolCallRequest {
                    id: call["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{i}")),
                    function_name: call["function"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    arguments_raw: arguments_text(&call["function"]["arguments"]),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        id: json["id"].as_str().unwrap_or_default().to_string(),
        model: json["model"].as_str().unwrap_or_default().to_string(),
        message: Message::assistant_with_tool_calls(content, tool_calls),
        finish_reason: finish.map(FinishReason::from_wire),
        usage: parse_usage(json),
    })
}

/// Arguments arrive as a JSON string (OpenAI) or an object (Ollama).
pub(crate) fn arguments_text(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read usage from either `usage.{prompt,completion}_tokens` or Ollama's
/// `prompt_eval_count`/`eval_count`.
pub(crate) fn parse_usage(json: &Value) -> Option<TokenUsage> {
    let usage = &json["usage"];
    if usage.is_object() {
        return Some(TokenUsage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as usize,
        });
    }
    if json.get("eval_count").is_some() || json.get("prompt_eval_count").is_some() {
        return Some(TokenUsage {
            input_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0) as usize,
            output_tokens: json["eval_count"].as_u64().unwrap_or(0) as usize,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarion_types::{ChatOptions, ToolParameter};

    fn request() -> ChatRequest {
        ChatRequest {
            model: String::new(),
            messages: vec![Message::system("be brief"), Message::user("hi")],
            options: ChatOptions {
                temperature: Some(0.5),
                top_p: Some(0.9),
                max_tokens: Some(256),
            },
            tools: vec![],
            response_format: None,
        }
    }

    #[test]
    fn request_uses_default_model_and_options() {
        let body = to_api_request(&request(), "gpt-4o-mini", true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn unary_request_has_no_stream_options() {
        let body = to_api_request(&request(), "m", false);
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn request_maps_tools() {
        let mut req = request();
        req.tools.push(
            ToolDefinition::new("search", "Search")
                .param(ToolParameter::new("q", "string", "query").required()),
        );
        let body = to_api_request(&req, "m", false);
        let tool = &body["tools"][0];
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "search");
        assert_eq!(tool["function"]["parameters"]["required"][0], "q");
    }

    #[test]
    fn assistant_tool_calls_and_tool_results_round_the_wire() {
        let mut req = request();
        req.messages.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new("c1", "search", r#"{"q":"cats"}"#)],
        ));
        req.messages.push(Message::tool_result("c1", "search", "found"));
        let body = to_api_request(&req, "m", false);
        let assistant = &body["messages"][2];
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"q":"cats"}"#);
        let tool = &body["messages"][3];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "c1");
    }

    #[test]
    fn images_become_content_parts() {
        let mut req = request();
        req.messages = vec![Message::user("what is this").with_images(vec!["aGVsbG8=".into()])];
        let body = to_api_request(&req, "m", false);
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,aGVsbG8=");
    }

    #[test]
    fn response_format_json_schema() {
        let mut req = request();
        req.response_format = Some(ResponseFormat::JsonSchema {
            name: "tool_calls".into(),
            schema: json!({"type": "object"}),
            strict: false,
        });
        let body = to_api_request(&req, "m", false);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "tool_calls");
    }

    #[test]
    fn parses_openai_tool_call_response() {
        let json = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_a",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"q\":\"cats\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7}
        });
        let resp = from_api_response(&json).unwrap();
        assert_eq!(resp.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(resp.message.tool_calls[0].function_name, "search");
        assert_eq!(resp.usage.unwrap().output_tokens, 7);
    }

    #[test]
    fn parses_ollama_native_response() {
        let json = json!({
            "model": "llama3.2",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "search", "arguments": {"q": "cats"}}}]
            },
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 3,
            "eval_count": 4
        });
        let resp = from_api_response(&json).unwrap();
        let call = &resp.message.tool_calls[0];
        assert_eq!(call.id, "call_0");
        assert_eq!(call.arguments().unwrap(), json!({"q": "cats"}));
        assert_eq!(resp.usage.unwrap().input_tokens, 3);
    }

    #[test]
    fn error_body_with_ok_status_is_api_error() {
        let err = from_api_response(&json!({"error": {"message": "bad tools"}})).unwrap_err();
        assert!(matches!(err, ProviderError::Api(ref api) if api.message == "bad tools"));
    }
}
