//! Tool calling through a structured JSON answer, for backends without
//! native function calling.

use clarion_types::{ResponseFormat, ToolCallRequest, ToolDefinition, ToolExecutionResult};
use serde_json::{Value, json};

/// The parsed structured answer.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredAnswer {
    /// The model's explanation, shown to the user.
    pub reasoning: String,
    /// Valid calls, in the order the model listed them.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Whether the model asked for another round.
    pub needs_tool_execution: bool,
    /// Whether a JSON answer was found at all. When `false`, `reasoning`
    /// holds the raw text.
    pub parsed: bool,
}

/// Describes the tool catalogue as a JSON answer format and parses the
/// model's reply back into [`ToolCallRequest`]s.
///
/// The expected answer:
///
/// ```json
/// {
///   "reasoning": "why",
///   "toolCalls": [{"toolName": "search", "arguments": {"q": "cats"}, "reasoning": "need info"}],
///   "needsToolExecution": true
/// }
/// ```
pub struct StructuredOutputFallback {
    tools: Vec<ToolDefinition>,
}

impl StructuredOutputFallback {
    /// Create a fallback over the offered tools.
    #[must_use]
    pub fn new(tools: &[ToolDefinition]) -> Self {
        Self {
            tools: tools.to_vec(),
        }
    }

    /// JSON Schema of the answer. `toolName` is restricted to the known
    /// tool names.
    #[must_use]
    pub fn schema(&self) -> Value {
        let mut tool_name = json!({"type": "string"});
        if !self.tools.is_empty() {
            let names: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
            tool_name["enum"] = json!(names);
        }
        json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "toolCalls": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "toolName": tool_name,
                            "arguments": {"type": "object"},
                            "reasoning": {"type": "string"}
                        },
                        "required": ["toolName", "arguments", "reasoning"]
                    }
                },
                "needsToolExecution": {"type": "boolean"}
            },
            "required": ["reasoning", "toolCalls", "needsToolExecution"]
        })
    }

    /// The `response_format` constraining output to [`schema`](Self::schema).
    #[must_use]
    pub fn response_format(&self) -> ResponseFormat {
        ResponseFormat::JsonSchema {
            name: "tool_calls".to_string(),
            schema: self.schema(),
            strict: false,
        }
    }

    /// A description of the available tools for the system prompt.
    #[must_use]
    pub fn catalogue(&self) -> String {
        let mut out = String::from("Available tools:\n");
        for tool in &self.tools {
            out.push_str(&format!(
                "- {}: {}\n  arguments schema: {}\n",
                tool.name,
                tool.description,
                tool.input_schema()
            ));
        }
        out
    }

    /// Full textual contract for backends that cannot enforce a schema.
    #[must_use]
    pub fn prompt_contract(&self) -> String {
        format!(
            "{}\nAnswer ONLY with a JSON object of this shape and no other text:\n\
             {{\"reasoning\": string, \"toolCalls\": [{{\"toolName\": string, \"arguments\": object, \"reasoning\": string}}], \"needsToolExecution\": boolean}}\n\
             Set needsToolExecution to false and toolCalls to [] once you can answer without tools; \
             put the answer in reasoning.",
            self.catalogue()
        )
    }

    /// The follow-up message carrying tool results back to the model.
    #[must_use]
    pub fn results_message(results: &[ToolExecutionResult]) -> String {
        let mut out = String::from("Tool results:\n");
        for result in results {
            out.push_str(&format!("[{}] {}\n", result.tool_name, result.display_content()));
        }
        out.push_str("Continue, answering in the same JSON format.");
        out
    }

    /// Parse a raw reply.
    ///
    /// Tries the whole text as JSON, then each fenced code block, then the
    /// first balanced `{...}` segment. Calls naming an unknown tool or
    /// missing a required argument are dropped with a warning.
    #[must_use]
    pub fn parse(&self, raw: &str) -> StructuredAnswer {
        let Some(answer) = extract_object(raw) else {
            tracing::warn!("structured answer is not JSON, treating it as plain text");
            return StructuredAnswer {
                reasoning: raw.trim().to_string(),
                tool_calls: Vec::new(),
                needs_tool_execution: false,
                parsed: false,
            };
        };

        let reasoning = answer
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let entries = answer
            .get("toolCalls")
            .or_else(|| answer.get("tool_calls"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let tool_calls: Vec<ToolCallRequest> =
            entries.iter().filter_map(|entry| self.to_call(entry)).collect();
        let needs_tool_execution = answer
            .get("needsToolExecution")
            .or_else(|| answer.get("needs_tool_execution"))
            .and_then(Value::as_bool)
            .unwrap_or(!tool_calls.is_empty());

        StructuredAnswer {
            reasoning,
            tool_calls,
            needs_tool_execution,
            parsed: true,
        }
    }

    fn to_call(&self, entry: &Value) -> Option<ToolCallRequest> {
        let name = entry
            .get("toolName")
            .or_else(|| entry.get("name"))
            .and_then(Value::as_str)?;
        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            tracing::warn!(tool = name, "structured answer names an unknown tool");
            return None;
        };

        let arguments = match entry.get("arguments") {
            Some(Value::String(text)) => serde_json::from_str(text).unwrap_or(Value::Null),
            Some(value) => value.clone(),
            None => json!({}),
        };
        let Some(args) = arguments.as_object() else {
            tracing::warn!(tool = name, "structured tool call arguments are not an object");
            return None;
        };
        if let Some(missing) = tool.required_parameters().find(|p| !args.contains_key(*p)) {
            tracing::warn!(tool = name, missing, "structured tool call lacks a required argument");
            return None;
        }

        Some(ToolCallRequest::new(
            format!("call_{}", uuid::Uuid::new_v4().simple()),
            name,
            arguments.to_string(),
        ))
    }
}

fn extract_object(raw: &str) -> Option<Value> {
    let as_object = |text: &str| {
        serde_json::from_str::<Value>(text.trim())
            .ok()
            .filter(Value::is_object)
    };

    if let Some(value) = as_object(raw) {
        return Some(value);
    }
    for block in raw.split("```").skip(1).step_by(2) {
        let body = match block.split_once('\n') {
            Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest,
            _ => block,
        };
        if let Some(value) = as_object(body) {
            return Some(value);
        }
    }
    balanced_object(raw).and_then(as_object)
}

/// The first `{...}` segment with balanced braces, ignoring braces inside
/// string literals.
fn balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarion_types::ToolParameter;

    fn fallback() -> StructuredOutputFallback {
        StructuredOutputFallback::new(&[
            ToolDefinition::new("search", "Search the web")
                .param(ToolParameter::new("q", "string", "query").required()),
            ToolDefinition::new("clock", "Current time"),
        ])
    }

    #[test]
    fn parses_direct_json() {
        let answer = fallback().parse(
            r#"{"reasoning":"ok","toolCalls":[{"toolName":"search","arguments":{"q":"cats"},"reasoning":"need info"}],"needsToolExecution":true}"#,
        );
        assert!(answer.parsed);
        assert_eq!(answer.reasoning, "ok");
        assert!(answer.needs_tool_execution);
        assert_eq!(answer.tool_calls.len(), 1);
        assert_eq!(answer.tool_calls[0].function_name, "search");
        assert_eq!(answer.tool_calls[0].arguments().unwrap()["q"], "cats");
    }

    #[test]
    fn parses_fenced_block() {
        let raw = "Sure, here you go:\n```json\n{\"reasoning\":\"r\",\"toolCalls\":[{\"toolName\":\"clock\",\"arguments\":{},\"reasoning\":\"x\"}],\"needsToolExecution\":true}\n```\nDone.";
        let answer = fallback().parse(raw);
        assert_eq!(answer.tool_calls.len(), 1);
        assert_eq!(answer.tool_calls[0].function_name, "clock");
    }

    #[test]
    fn parses_embedded_object() {
        let raw = r#"I think {"reasoning":"the answer is {42}","toolCalls":[],"needsToolExecution":false} is right"#;
        let answer = fallback().parse(raw);
        assert!(answer.parsed);
        assert_eq!(answer.reasoning, "the answer is {42}");
        assert!(!answer.needs_tool_execution);
    }

    #[test]
    fn filters_unknown_tools_and_missing_arguments() {
        let answer = fallback().parse(
            r#"{"reasoning":"","toolCalls":[
                {"toolName":"delete_everything","arguments":{},"reasoning":""},
                {"toolName":"search","arguments":{},"reasoning":""},
                {"toolName":"search","arguments":"{\"q\":\"dogs\"}","reasoning":""}
            ],"needsToolExecution":true}"#,
        );
        assert_eq!(answer.tool_calls.len(), 1);
        assert_eq!(answer.tool_calls[0].arguments().unwrap()["q"], "dogs");
    }

    #[test]
    fn plain_text_is_unparsed() {
        let answer = fallback().parse("  The capital of France is Paris. ");
        assert!(!answer.parsed);
        assert_eq!(answer.reasoning, "The capital of France is Paris.");
        assert!(answer.tool_calls.is_empty());
    }

    #[test]
    fn schema_lists_known_names() {
        let schema = fallback().schema();
        assert_eq!(
            schema["properties"]["toolCalls"]["items"]["properties"]["toolName"]["enum"],
            json!(["search", "clock"])
        );
        assert!(matches!(
            fallback().response_format(),
            ResponseFormat::JsonSchema { .. }
        ));
    }

    #[test]
    fn contract_mentions_every_tool() {
        let contract = fallback().prompt_contract();
        assert!(contract.contains("- search: Search the web"));
        assert!(contract.contains("- clock: Current time"));
        assert!(contract.contains("needsToolExecution"));
    }
}
