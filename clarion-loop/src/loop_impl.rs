//! Core AgentLoop struct and run method.

use std::sync::{Arc, Mutex};

use clarion_negotiator::AdaptiveToolNegotiator;
use clarion_tool::ToolExecutionEngine;
use clarion_types::{
    ChatRequest, ChatTransport, Message, NegotiationError, ProviderError, Role, TokenUsage,
    ToolCallRequest, ToolContext, ToolDefinition, ToolExecutionResult,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::assembler::ToolCallAssembler;
use crate::config::{AgentConfig, StructuredMode, ToolMode};
use crate::structured::StructuredOutputFallback;

/// One user turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    /// Model identifier. Empty selects the transport's default.
    pub model: String,
    /// The user's message.
    pub message: Message,
    /// Tools to offer. `None` offers every tool the engine can dispatch.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Earlier conversation, oldest first, without the system prompt.
    pub history: Vec<Message>,
}

impl TurnInput {
    /// A turn with a text message, no history, and every engine tool.
    #[must_use]
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message: Message::user(message),
            tools: None,
            history: Vec::new(),
        }
    }

    /// Offer only these tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Continue from an earlier conversation.
    #[must_use]
    pub fn history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model answered without asking for more tools.
    Completed,
    /// The iteration budget ran out while the model still wanted tools.
    BudgetExhausted,
    /// The caller pressed stop. Not an error.
    Stopped,
    /// A fatal error ended the turn.
    Failed(String),
}

/// What happened in one generate/execute round.
#[derive(Debug, Clone)]
pub struct AgentIterationRecord {
    /// 1-based round number.
    pub step: usize,
    /// Visible text the model produced this round.
    pub response: String,
    /// Tool calls requested this round.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Results of those calls, in the same order.
    pub tool_results: Vec<ToolExecutionResult>,
    /// Whether the loop wanted another round afterwards.
    pub has_more_work: bool,
}

/// The result of [`AgentLoop::run_turn`].
#[derive(Debug, Clone)]
pub struct FinalMessage {
    /// All visible output of the turn, including diagnostics and markers.
    pub content: String,
    /// How the turn ended.
    pub status: TurnStatus,
    /// One record per round.
    pub iterations: Vec<AgentIterationRecord>,
    /// The full conversation after the turn, including the system prompt.
    pub messages: Vec<Message>,
    /// Token usage summed over every request.
    pub usage: TokenUsage,
}

/// Marker appended when the iteration budget runs out.
pub const BUDGET_EXHAUSTED_MARKER: &str = "[stopped: iteration budget exhausted]";

/// Stops the current turn from another task.
///
/// Stopping is cooperative: it is observed at the top of every round,
/// between stream frames, and between tool calls. A stop issued while no
/// turn is running applies to the next one.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    /// Request a stop.
    pub fn stop(&self) {
        self.current().cancel();
    }

    /// Whether a stop is pending.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.current().is_cancelled()
    }

    fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace a consumed token so the next turn starts clean.
    fn rearm(&self) {
        let mut token = self
            .token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// Output of one model request.
struct Generation {
    /// Text shown to the user.
    visible: String,
    /// Assistant message content to record in the conversation.
    recorded: String,
    calls: Vec<ToolCallRequest>,
    usage: Option<TokenUsage>,
    stopped: bool,
    /// `visible` was already delivered chunk by chunk.
    streamed: bool,
}

/// The agentic loop: drives transport, negotiation, and tool execution for
/// one turn at a time.
///
/// # Example
///
/// ```ignore
/// let agent = AgentLoop::new(negotiator, engine, AgentConfig::default());
/// let stop = agent.stop_handle();
/// let reply = agent
///     .run_turn(TurnInput::new("gpt-4o-mini", "What's new?"), &mut |chunk| print!("{chunk}"))
///     .await;
/// ```
pub struct AgentLoop<T: ChatTransport> {
    pub(crate) negotiator: AdaptiveToolNegotiator<T>,
    pub(crate) engine: ToolExecutionEngine,
    pub(crate) config: AgentConfig,
    stop: StopHandle,
}

impl<T: ChatTransport> AgentLoop<T> {
    /// Create a loop.
    #[must_use]
    pub fn new(
        negotiator: AdaptiveToolNegotiator<T>,
        engine: ToolExecutionEngine,
        config: AgentConfig,
    ) -> Self {
        Self {
            negotiator,
            engine,
            config,
            stop: StopHandle::default(),
        }
    }

    /// Returns a reference to the current configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// A handle that stops the running turn.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run one turn to completion.
    ///
    /// `on_chunk` receives visible text as it becomes available: streamed
    /// content, structured-mode reasoning, diagnostics, and the budget
    /// marker. The returned [`FinalMessage::content`] is their
    /// concatenation.
    ///
    /// Never fails: a fatal error yields [`TurnStatus::Failed`] with a
    /// labelled error in the output.
    pub async fn run_turn(
        &self,
        input: TurnInput,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> FinalMessage {
        let cancel = self.stop.current();
        let result = self.drive(input, on_chunk, &cancel).await;
        self.stop.rearm();
        result
    }

    async fn drive(
        &self,
        input: TurnInput,
        on_chunk: &mut (dyn FnMut(&str) + Send),
        cancel: &CancellationToken,
    ) -> FinalMessage {
        let mode = self
            .config
            .tool_mode
            .resolve(self.negotiator.transport().capabilities());
        let tools = match input.tools {
            Some(tools) => tools,
            None => self.engine.definitions().await,
        };
        let fallback = StructuredOutputFallback::new(&tools);

        let mut turn = FinalMessage {
            content: String::new(),
            status: TurnStatus::Completed,
            iterations: Vec::new(),
            messages: Vec::new(),
            usage: TokenUsage::default(),
        };
        let system = match (mode, &self.config.system_prompt) {
            (ToolMode::Structured(StructuredMode::PromptContract), prompt) => Some(join_prompt(
                prompt.as_deref(),
                &fallback.prompt_contract(),
            )),
            (ToolMode::Structured(StructuredMode::JsonSchema), prompt) if !tools.is_empty() => {
                Some(join_prompt(prompt.as_deref(), &fallback.catalogue()))
            }
            (_, prompt) => prompt.clone(),
        };
        if let Some(system) = system {
            turn.messages.push(Message::system(system));
        }
        turn.messages
            .extend(input.history.into_iter().filter(|m| m.role != Role::System));
        turn.messages.push(input.message);

        let ctx = ToolContext {
            session_id: self.config.session_id.clone(),
            cancellation_token: cancel.clone(),
        };

        for step in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                tracing::debug!(step, "stop requested before round");
                turn.status = TurnStatus::Stopped;
                return turn;
            }
            tracing::debug!(step, messages = turn.messages.len(), "agent round");

            let mut request = ChatRequest {
                model: input.model.clone(),
                messages: turn.messages.clone(),
                options: self.config.options.clone(),
                ..ChatRequest::default()
            };
            let generated = match mode {
                ToolMode::Structured(structured) => {
                    if structured == StructuredMode::JsonSchema {
                        request.response_format = Some(fallback.response_format());
                    }
                    self.generate_structured(request, &fallback).await
                }
                _ => {
                    request.tools = tools.clone();
                    self.generate_native(request, on_chunk, cancel, &mut turn.content)
                        .await
                }
            };

            let generation = match generated {
                Ok(generation) => generation,
                Err(e) if e.is_cancelled() => {
                    turn.status = TurnStatus::Stopped;
                    return turn;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(step, error = %e, "transient failure, continuing");
                    emit(
                        &mut turn.content,
                        on_chunk,
                        &format!("[transient error, retrying: {e}]"),
                    );
                    turn.iterations.push(AgentIterationRecord {
                        step,
                        response: String::new(),
                        tool_calls: Vec::new(),
                        tool_results: Vec::new(),
                        has_more_work: true,
                    });
                    continue;
                }
                Err(e) => {
                    let label = failure_label(&e);
                    emit(&mut turn.content, on_chunk, &label);
                    turn.messages.push(Message::assistant(label));
                    turn.status = TurnStatus::Failed(e.to_string());
                    return turn;
                }
            };

            if let Some(usage) = &generation.usage {
                turn.usage.accumulate(usage);
            }
            if !generation.streamed && !generation.visible.is_empty() {
                emit(&mut turn.content, on_chunk, &generation.visible);
            }

            if generation.stopped {
                turn.status = TurnStatus::Stopped;
                return turn;
            }

            if generation.calls.is_empty() {
                turn.messages.push(Message::assistant(generation.recorded));
                turn.iterations.push(AgentIterationRecord {
                    step,
                    response: generation.visible,
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                    has_more_work: false,
                });
                turn.status = TurnStatus::Completed;
                return turn;
            }

            let results = self.engine.execute_all(&generation.calls, &ctx).await;
            if cancel.is_cancelled() {
                tracing::debug!(step, "stop requested during tool execution, discarding results");
                turn.status = TurnStatus::Stopped;
                return turn;
            }

            match mode {
                ToolMode::Structured(_) => {
                    turn.messages.push(Message::assistant(generation.recorded));
                    turn.messages
                        .push(Message::user(StructuredOutputFallback::results_message(&results)));
                }
                _ => {
                    turn.messages.push(Message::assistant_with_tool_calls(
                        generation.recorded,
                        generation.calls.clone(),
                    ));
                    for result in &results {
                        turn.messages.push(Message::tool_result(
                            &result.tool_call_id,
                            &result.tool_name,
                            result.display_content(),
                        ));
                    }
                }
            }
            turn.iterations.push(AgentIterationRecord {
                step,
                response: generation.visible,
                tool_calls: generation.calls,
                tool_results: results,
                has_more_work: true,
            });
        }

        tracing::info!(
            max_iterations = self.config.max_iterations,
            "iteration budget exhausted"
        );
        emit(&mut turn.content, on_chunk, BUDGET_EXHAUSTED_MARKER);
        turn.status = TurnStatus::BudgetExhausted;
        turn
    }

    /// Streamed text is appended to `output` as it arrives, so a stream
    /// that breaks halfway still leaves its text visible.
    async fn generate_native(
        &self,
        request: ChatRequest,
        on_chunk: &mut (dyn FnMut(&str) + Send),
        cancel: &CancellationToken,
        output: &mut String,
    ) -> Result<Generation, NegotiationError> {
        let mut assembler = ToolCallAssembler::new();

        if !self.config.streaming {
            let response = self.negotiator.send(request).await?.value;
            let text = response.message.content;
            for call in response.message.tool_calls {
                assembler.push_complete(call);
            }
            return Ok(Generation {
                visible: text.clone(),
                recorded: text,
                calls: assembler.finish(),
                usage: response.usage,
                stopped: cancel.is_cancelled(),
                streamed: false,
            });
        }

        let mut stream = self
            .negotiator
            .stream(request, cancel.clone())
            .await?
            .value
            .receiver;
        let mut text = String::new();
        let mut usage = None;
        let mut stopped = false;
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(ProviderError::Cancelled) => {
                    stopped = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(content) = event.content.as_deref()
                && !content.is_empty()
            {
                if text.is_empty() && !output.is_empty() {
                    output.push_str(ROUND_SEPARATOR);
                    on_chunk(ROUND_SEPARATOR);
                }
                text.push_str(content);
                output.push_str(content);
                on_chunk(content);
            }
            for delta in &event.tool_calls {
                assembler.push(delta);
            }
            if event.usage.is_some() {
                usage = event.usage;
            }
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }
        }

        Ok(Generation {
            visible: text.clone(),
            recorded: text,
            calls: assembler.finish(),
            usage,
            stopped,
            streamed: true,
        })
    }

    async fn generate_structured(
        &self,
        request: ChatRequest,
        fallback: &StructuredOutputFallback,
    ) -> Result<Generation, NegotiationError> {
        let response = self.negotiator.send(request).await?.value;
        let raw = response.message.content;
        let answer = fallback.parse(&raw);
        let calls = if answer.needs_tool_execution {
            answer.tool_calls
        } else {
            Vec::new()
        };
        Ok(Generation {
            visible: answer.reasoning,
            recorded: raw,
            calls,
            usage: response.usage,
            stopped: false,
            streamed: false,
        })
    }
}

fn join_prompt(prompt: Option<&str>, addition: &str) -> String {
    match prompt {
        Some(prompt) if !prompt.is_empty() => format!("{prompt}\n\n{addition}"),
        _ => addition.to_string(),
    }
}

const ROUND_SEPARATOR: &str = "\n\n";

fn emit(content: &mut String, on_chunk: &mut (dyn FnMut(&str) + Send), text: &str) {
    let piece = if content.is_empty() {
        text.to_string()
    } else {
        format!("{ROUND_SEPARATOR}{text}")
    };
    on_chunk(&piece);
    content.push_str(&piece);
}

fn failure_label(error: &NegotiationError) -> String {
    match error {
        NegotiationError::Exhausted { .. } => {
            format!("[error: tool negotiation exhausted] {error}")
        }
        NegotiationError::MessageFormat { .. } => {
            format!("[error: request rejected] {error}")
        }
        NegotiationError::Provider(_) => format!("[error] {error}"),
    }
}
