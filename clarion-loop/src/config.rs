//! Configuration types for the agentic loop.

use clarion_types::{Capabilities, ChatOptions};

/// How the structured fallback describes the expected answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredMode {
    /// Constrain the output with a JSON Schema `response_format`.
    JsonSchema,
    /// Describe the answer format in the system prompt only.
    PromptContract,
}

/// How tools are offered to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    /// Pick from the transport's [`Capabilities`].
    #[default]
    Auto,
    /// Native function calling.
    Native,
    /// Tool calls encoded in a structured JSON answer.
    Structured(StructuredMode),
}

impl ToolMode {
    /// Resolve [`ToolMode::Auto`] against what the backend supports.
    #[must_use]
    pub fn resolve(self, capabilities: Capabilities) -> ToolMode {
        match self {
            ToolMode::Auto if capabilities.native_tools => ToolMode::Native,
            ToolMode::Auto if capabilities.json_schema => {
                ToolMode::Structured(StructuredMode::JsonSchema)
            }
            ToolMode::Auto => ToolMode::Structured(StructuredMode::PromptContract),
            explicit => explicit,
        }
    }
}

/// Configuration for the agentic loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum generate/execute rounds per turn.
    pub max_iterations: usize,
    /// System prompt placed before the history.
    pub system_prompt: Option<String>,
    /// Sampling options for every request.
    pub options: ChatOptions,
    /// Stream responses. When off, each round is a single unary request.
    pub streaming: bool,
    /// How tools are offered.
    pub tool_mode: ToolMode,
    /// Session identifier handed to tools.
    pub session_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: None,
            options: ChatOptions::default(),
            streaming: true,
            tool_mode: ToolMode::Auto,
            session_id: String::new(),
        }
    }
}
