//! Built-in middleware implementations.

use std::collections::HashMap;

use clarion_types::{BoxFuture, ToolContext, ToolDefinition, ToolError, ToolResultPayload};
use serde_json::Value;

use crate::middleware::{Next, ToolCall, ToolMiddleware};
use crate::registry::ToolRegistry;

/// Middleware that truncates tool output to a maximum character length.
///
/// Applies to text payloads and to structured payloads whose rendering
/// exceeds the limit (those are replaced by their truncated text form).
/// Images pass through.
pub struct OutputFormatter {
    max_chars: usize,
}

impl OutputFormatter {
    /// Create a new output formatter with the given character limit.
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    fn truncate(&self, text: &str) -> String {
        let mut boundary = self.max_chars;
        while boundary > 0 && !text.is_char_boundary(boundary) {
            boundary -= 1;
        }
        format!(
            "{}... [truncated, {} chars total]",
            &text[..boundary],
            text.len()
        )
    }
}

impl ToolMiddleware for OutputFormatter {
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        ctx: &'a ToolContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        Box::pin(async move {
            let payload = next.run(call, ctx).await?;
            Ok(match payload {
                ToolResultPayload::Text(text) if text.len() > self.max_chars => {
                    ToolResultPayload::Text(self.truncate(&text))
                }
                ToolResultPayload::StructuredData(value) => {
                    let rendered = ToolResultPayload::StructuredData(value);
                    let text = rendered.to_display_string();
                    if text.len() > self.max_chars {
                        ToolResultPayload::Text(self.truncate(&text))
                    } else {
                        rendered
                    }
                }
                other => other,
            })
        })
    }
}

/// Middleware that validates call arguments against the tool's declared
/// parameters.
///
/// Checks that the input is an object, required fields are present, and
/// property types match. Catches obvious argument errors before the tool
/// executes.
pub struct SchemaValidator {
    /// Map of tool name to its rendered input schema.
    schemas: HashMap<String, Value>,
}

impl SchemaValidator {
    /// Snapshot the definitions of every tool currently in `registry`.
    ///
    /// Tools registered after this call will not be validated.
    #[must_use]
    pub fn new(registry: &ToolRegistry) -> Self {
        Self::from_definitions(&registry.definitions())
    }

    /// Build a validator from explicit definitions.
    #[must_use]
    pub fn from_definitions(definitions: &[ToolDefinition]) -> Self {
        let schemas = definitions
            .iter()
            .map(|def| (def.name.clone(), def.input_schema()))
            .collect();
        Self { schemas }
    }
}

impl ToolMiddleware for SchemaValidator {
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        ctx: &'a ToolContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        Box::pin(async move {
            if let Some(schema) = self.schemas.get(&call.name) {
                validate_input(&call.input, schema)?;
            }
            next.run(call, ctx).await
        })
    }
}

/// Validate a JSON input value against an object schema.
pub(crate) fn validate_input(input: &Value, schema: &Value) -> Result<(), ToolError> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(Value::String(ty)) = schema_obj.get("type")
        && ty == "object"
        && !input.is_object()
    {
        return Err(ToolError::InvalidInput("expected object input".to_string()));
    }

    let Some(input_obj) = input.as_object() else {
        return Ok(());
    };

    if let Some(Value::Array(required)) = schema_obj.get("required") {
        for field in required {
            if let Some(field_name) = field.as_str()
                && !input_obj.contains_key(field_name)
            {
                return Err(ToolError::InvalidInput(format!(
                    "missing required field: {field_name}"
                )));
            }
        }
    }

    if let Some(Value::Object(properties)) = schema_obj.get("properties") {
        for (field_name, prop_schema) in properties {
            if let Some(value) = input_obj.get(field_name)
                && let Some(Value::String(expected_type)) = prop_schema.get("type")
                && !json_type_matches(value, expected_type)
            {
                return Err(ToolError::InvalidInput(format!(
                    "field '{field_name}' expected type '{expected_type}', got {}",
                    json_type_name(value)
                )));
            }
        }
    }

    Ok(())
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
