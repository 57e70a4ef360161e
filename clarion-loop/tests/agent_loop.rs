//! Integration tests for clarion-loop.

use std::sync::{Arc, Mutex};

use clarion_loop::*;
use clarion_negotiator::{AdaptiveToolNegotiator, Blacklist};
use clarion_state_memory::MemoryBlacklistStore;
use clarion_tool::{ToolExecutionEngine, ToolRegistry};
use clarion_types::*;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

enum Scripted {
    Reply(ChatResponse),
    Stream(Vec<Result<DeltaEvent, ProviderError>>),
    Fail(ProviderError),
}

/// A mock transport that replays pre-configured outcomes in sequence.
struct MockTransport {
    script: Mutex<Vec<Scripted>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    capabilities: Capabilities,
}

impl MockTransport {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Arc::new(Mutex::new(Vec::new())),
            capabilities: Capabilities::default(),
        }
    }

    fn next(&self, request: ChatRequest) -> Scripted {
        self.requests.lock().unwrap().push(request);
        let mut script = self.script.lock().unwrap();
        assert!(!script.is_empty(), "MockTransport: no more responses configured");
        script.remove(0)
    }
}

impl ChatTransport for MockTransport {
    fn provider_key(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.next(request) {
            Scripted::Reply(response) => Ok(response),
            Scripted::Fail(e) => Err(e),
            Scripted::Stream(_) => panic!("expected a unary request"),
        }
    }

    async fn stream(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<StreamHandle, ProviderError> {
        match self.next(request) {
            Scripted::Stream(items) => Ok(StreamHandle::new(futures::stream::iter(items))),
            Scripted::Fail(e) => Err(e),
            Scripted::Reply(_) => panic!("expected a streaming request"),
        }
    }
}

/// Counts matches for a query.
struct SearchTool {
    calls: Arc<Mutex<Vec<Value>>>,
}

impl ToolDyn for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("search", "Search the catalogue")
            .param(ToolParameter::new("q", "string", "query").required())
    }

    fn call_dyn<'a>(
        &'a self,
        input: Value,
        _ctx: &'a ToolContext,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        Box::pin(async move {
            let q = input["q"].as_str().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(input);
            Ok(ToolResultPayload::Text(format!("3 {q} found")))
        })
    }
}

fn reply(content: &str, tool_calls: Vec<ToolCallRequest>) -> Scripted {
    Scripted::Reply(ChatResponse {
        id: "resp".into(),
        model: "mock".into(),
        message: Message::assistant_with_tool_calls(content, tool_calls),
        finish_reason: Some(FinishReason::Stop),
        usage: Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    })
}

fn text_stream(chunks: &[&str]) -> Scripted {
    Scripted::Stream(chunks.iter().map(|c| Ok(DeltaEvent::text(*c))).collect())
}

fn tool_stream() -> Scripted {
    let fragment = |id: Option<&str>, name: Option<&str>, args: &str| DeltaEvent {
        tool_calls: vec![ToolCallDelta {
            index: Some(0),
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: Some(args.to_string()),
        }],
        ..DeltaEvent::default()
    };
    Scripted::Stream(vec![
        Ok(DeltaEvent::text("Searching.")),
        Ok(fragment(Some("call_1"), Some("search"), "")),
        Ok(fragment(None, None, "{\"q\":")),
        Ok(fragment(None, None, "\"cats\"}")),
    ])
}

struct Harness {
    agent: AgentLoop<MockTransport>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    tool_calls: Arc<Mutex<Vec<Value>>>,
}

fn harness(transport: MockTransport, config: AgentConfig) -> Harness {
    let requests = transport.requests.clone();
    let tool_calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register_dyn(Arc::new(SearchTool {
        calls: tool_calls.clone(),
    }));
    let blacklist = Arc::new(Blacklist::new(Arc::new(MemoryBlacklistStore::new())));
    let agent = AgentLoop::new(
        AdaptiveToolNegotiator::new(transport, blacklist),
        ToolExecutionEngine::new(Arc::new(registry)),
        config,
    );
    Harness {
        agent,
        requests,
        tool_calls,
    }
}

async fn run(agent: &AgentLoop<MockTransport>, message: &str) -> FinalMessage {
    agent
        .run_turn(TurnInput::new("mock", message), &mut |_: &str| {})
        .await
}

#[tokio::test]
async fn completes_without_tools() {
    let h = harness(
        MockTransport::new(vec![text_stream(&["Hel", "lo"])]),
        AgentConfig::default(),
    );
    let mut chunks = Vec::new();
    let reply = h
        .agent
        .run_turn(TurnInput::new("mock", "hi"), &mut |c: &str| chunks.push(c.to_string()))
        .await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.content, "Hello");
    assert_eq!(chunks, vec!["Hel", "lo"]);
    assert_eq!(reply.iterations.len(), 1);
    assert!(!reply.iterations[0].has_more_work);
    let roles: Vec<Role> = reply.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn executes_tools_and_follows_up() {
    let h = harness(
        MockTransport::new(vec![tool_stream(), text_stream(&["There are 3 cats."])]),
        AgentConfig {
            system_prompt: Some("Be brief.".into()),
            ..AgentConfig::default()
        },
    );
    let reply = run(&h.agent, "how many cats?").await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.content, "Searching.\n\nThere are 3 cats.");
    assert_eq!(*h.tool_calls.lock().unwrap(), vec![serde_json::json!({"q": "cats"})]);

    let roles: Vec<Role> = reply.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(reply.messages[2].tool_calls[0].function_name, "search");
    assert_eq!(reply.messages[3].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(reply.messages[3].content, "3 cats found");

    let requests = h.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[1].messages.len(), 4);
    assert_eq!(reply.iterations.len(), 2);
    assert!(reply.iterations[0].tool_results[0].success);
}

#[tokio::test]
async fn iteration_budget_is_enforced() {
    let always_tool = || reply("", vec![ToolCallRequest::new("c", "search", r#"{"q":"x"}"#)]);
    let h = harness(
        MockTransport::new(vec![always_tool(), always_tool(), always_tool()]),
        AgentConfig {
            max_iterations: 3,
            streaming: false,
            ..AgentConfig::default()
        },
    );
    let reply = run(&h.agent, "loop forever").await;

    assert_eq!(reply.status, TurnStatus::BudgetExhausted);
    assert!(reply.content.ends_with(BUDGET_EXHAUSTED_MARKER));
    assert_eq!(reply.iterations.len(), 3);
    assert!(reply.iterations.iter().all(|i| i.has_more_work));
    assert_eq!(h.requests.lock().unwrap().len(), 3);
    assert_eq!(h.tool_calls.lock().unwrap().len(), 3);
    assert_eq!(
        reply.usage,
        TokenUsage {
            input_tokens: 30,
            output_tokens: 15
        }
    );
}

#[tokio::test]
async fn stop_mid_stream_keeps_partial_output() {
    let h = harness(
        MockTransport::new(vec![
            text_stream(&["c0 ", "c1 ", "c2 ", "c3 ", "c4 "]),
            text_stream(&["again"]),
        ]),
        AgentConfig::default(),
    );
    let stop = h.agent.stop_handle();
    let mut seen = 0;
    let reply = h
        .agent
        .run_turn(TurnInput::new("mock", "count"), &mut |_: &str| {
            seen += 1;
            if seen == 2 {
                stop.stop();
            }
        })
        .await;

    assert_eq!(reply.status, TurnStatus::Stopped);
    assert_eq!(reply.content, "c0 c1 ");
    assert_eq!(seen, 2);

    let next = run(&h.agent, "again").await;
    assert_eq!(next.status, TurnStatus::Completed);
    assert_eq!(next.content, "again");
}

#[tokio::test]
async fn stop_before_turn_sends_nothing() {
    let h = harness(
        MockTransport::new(vec![text_stream(&["hi"])]),
        AgentConfig::default(),
    );
    h.agent.stop_handle().stop();
    let reply = run(&h.agent, "hello").await;

    assert_eq!(reply.status, TurnStatus::Stopped);
    assert!(h.requests.lock().unwrap().is_empty());
    assert!(!h.agent.stop_handle().is_stopped());
}

#[tokio::test]
async fn structured_fallback_round_trip() {
    let mut transport = MockTransport::new(vec![
        reply(
            r#"{"reasoning":"ok","toolCalls":[{"toolName":"search","arguments":{"q":"cats"},"reasoning":"need info"}],"needsToolExecution":true}"#,
            vec![],
        ),
        reply(
            r#"{"reasoning":"There are 3 cats.","toolCalls":[],"needsToolExecution":false}"#,
            vec![],
        ),
    ]);
    transport.capabilities = Capabilities {
        native_tools: false,
        json_schema: true,
    };
    let h = harness(transport, AgentConfig::default());
    let reply = run(&h.agent, "how many cats?").await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.content, "ok\n\nThere are 3 cats.");
    assert_eq!(*h.tool_calls.lock().unwrap(), vec![serde_json::json!({"q": "cats"})]);

    let requests = h.requests.lock().unwrap();
    assert!(requests[0].tools.is_empty());
    assert!(matches!(
        requests[0].response_format,
        Some(ResponseFormat::JsonSchema { .. })
    ));
    assert_eq!(requests[0].messages[0].role, Role::System);
    let follow_up = requests[1].messages.last().unwrap();
    assert_eq!(follow_up.role, Role::User);
    assert!(follow_up.content.contains("[search] 3 cats found"));
}

#[tokio::test]
async fn prompt_contract_mode_has_no_response_format() {
    let h = harness(
        MockTransport::new(vec![reply("Just text, no JSON.", vec![])]),
        AgentConfig {
            tool_mode: ToolMode::Structured(StructuredMode::PromptContract),
            system_prompt: Some("Be brief.".into()),
            ..AgentConfig::default()
        },
    );
    let reply = run(&h.agent, "hi").await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.content, "Just text, no JSON.");
    let requests = h.requests.lock().unwrap();
    assert!(requests[0].response_format.is_none());
    let system = &requests[0].messages[0].content;
    assert!(system.starts_with("Be brief."));
    assert!(system.contains("- search: Search the catalogue"));
}

#[tokio::test]
async fn transient_failure_is_reported_and_retried() {
    let h = harness(
        MockTransport::new(vec![
            Scripted::Fail(ProviderError::ServiceUnavailable("overloaded".into())),
            text_stream(&["recovered"]),
        ]),
        AgentConfig::default(),
    );
    let reply = run(&h.agent, "hi").await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert!(reply.content.starts_with("[transient error, retrying:"));
    assert!(reply.content.ends_with("\n\nrecovered"));
    assert_eq!(reply.iterations.len(), 2);
}

#[tokio::test]
async fn fatal_failure_is_labelled() {
    let h = harness(
        MockTransport::new(vec![Scripted::Fail(ProviderError::Authentication(
            "bad key".into(),
        ))]),
        AgentConfig::default(),
    );
    let reply = run(&h.agent, "hi").await;

    assert!(matches!(reply.status, TurnStatus::Failed(ref e) if e.contains("bad key")));
    assert!(reply.content.starts_with("[error]"));
    let last = reply.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.contains("authentication failed"));
}

#[tokio::test]
async fn rejected_tool_is_pruned_inside_the_loop() {
    let h = harness(
        MockTransport::new(vec![
            Scripted::Fail(ProviderError::Api(ApiError {
                status: Some(400),
                message: "Invalid schema for function tools[0].parameters".into(),
                ..ApiError::default()
            })),
            text_stream(&["no tools needed"]),
        ]),
        AgentConfig::default(),
    );
    let reply = run(&h.agent, "hi").await;

    assert_eq!(reply.status, TurnStatus::Completed);
    let requests = h.requests.lock().unwrap();
    assert_eq!(requests[0].tools.len(), 1);
    assert!(requests[1].tools.is_empty());
}
