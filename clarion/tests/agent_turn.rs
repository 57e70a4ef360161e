//! End-to-end turns against a mocked OpenAI-compatible server.

use std::sync::Arc;

use clarion::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct LookupTool;

impl Tool for LookupTool {
    const NAME: &'static str = "lookup";
    type Args = Value;
    type Output = String;
    type Error = std::io::Error;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(Self::NAME, "Look up the weather for a city")
            .param(ToolParameter::new("city", "string", "city name").required())
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, std::io::Error> {
        Ok(format!("{}: 4°C and snowing", args["city"].as_str().unwrap_or("?")))
    }
}

fn sse(frames: &[Value]) -> String {
    let mut body: String = frames.iter().map(|f| format!("data: {f}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_frames(text: &str) -> String {
    sse(&[
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": text}}]}),
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
               "usage": {"prompt_tokens": 40, "completion_tokens": 8}}),
    ])
}

fn agent(server: &MockServer, store: Arc<dyn BlacklistStore>) -> AgentLoop<OpenAiCompat> {
    let transport = OpenAiCompat::openai("test-key").base_url(format!("{}/v1", server.uri()));
    let mut registry = ToolRegistry::new();
    registry.register(LookupTool);
    AgentLoop::new(
        AdaptiveToolNegotiator::new(transport, Arc::new(Blacklist::new(store))),
        ToolExecutionEngine::new(Arc::new(registry)),
        AgentConfig::default(),
    )
}

async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn streamed_tool_call_round_trip() {
    let server = MockServer::start().await;

    let follow_up = text_frames("It is 4°C and snowing in Oslo.");
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(r#""tool_call_id":"call_abc""#))
        .respond_with(ResponseTemplate::new(200).set_body_raw(follow_up, "text/event-stream"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let tool_turn = sse(&[
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "Checking."}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "id": "call_abc", "type": "function",
             "function": {"name": "lookup", "arguments": ""}}]}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"city\":"}}]}}]}),
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "\"Oslo\"}"}}]}, "finish_reason": "tool_calls"}],
               "usage": {"prompt_tokens": 30, "completion_tokens": 12}}),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(tool_turn, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let agent = agent(&server, Arc::new(MemoryBlacklistStore::new()));
    let mut streamed = String::new();
    let reply = agent
        .run_turn(TurnInput::new("", "Weather in Oslo?"), &mut |c: &str| {
            streamed.push_str(c)
        })
        .await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.content, "Checking.\n\nIt is 4°C and snowing in Oslo.");
    assert_eq!(streamed, reply.content);
    assert_eq!(reply.usage.input_tokens, 70);
    assert_eq!(reply.usage.output_tokens, 20);
    assert_eq!(
        reply.iterations[0].tool_results[0].display_content(),
        "Oslo: 4°C and snowing"
    );

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["stream"], true);
    assert_eq!(bodies[0]["tools"][0]["function"]["name"], "lookup");
    let messages = bodies[1]["messages"].as_array().unwrap();
    let tool_message = messages.iter().find(|m| m["role"] == "tool").unwrap();
    assert_eq!(tool_message["content"], "Oslo: 4°C and snowing");
    assert_eq!(tool_message["tool_call_id"], "call_abc");
}

#[tokio::test]
async fn rejected_schema_is_blacklisted_and_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Invalid schema for function 'tag_items': array schema missing items",
                "type": "invalid_request_error",
                "param": "tools[1].function.parameters",
                "code": "invalid_function_parameters"
            }
        })))
        .with_priority(1)
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(text_frames("Done."), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryBlacklistStore::new());
    let agent = agent(&server, store.clone());
    let tools = vec![
        Tool::definition(&LookupTool),
        ToolDefinition::new("tag_items", "Tag items")
            .param(ToolParameter::new("tags", "array", "tags to apply")),
    ];
    let reply = agent
        .run_turn(TurnInput::new("", "hi").tools(tools.clone()), &mut |_: &str| {})
        .await;

    assert_eq!(reply.status, TurnStatus::Completed);
    assert_eq!(reply.content, "Done.");

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["tools"].as_array().unwrap().len(), 2);
    let retried: Vec<&str> = bodies[1]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["function"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(retried, vec!["lookup"]);

    let entries = store.get("openai").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tool_name, "tag_items");

    // A second turn never offers the rejected tool.
    agent
        .run_turn(TurnInput::new("", "again").tools(tools), &mut |_: &str| {})
        .await;
    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 3);
    assert_eq!(bodies[2]["tools"].as_array().unwrap().len(), 1);
}

#[cfg(feature = "state-fs")]
#[tokio::test]
async fn blacklist_survives_restart_with_fs_store() {
    let dir = tempfile::tempdir().unwrap();
    let tool = ToolDefinition::new("tag_items", "Tag items");
    {
        let blacklist = Blacklist::new(Arc::new(FsBlacklistStore::new(dir.path())));
        assert!(blacklist.record("openai", &tool, "array schema missing items").await);
    }
    let reopened = Blacklist::new(Arc::new(FsBlacklistStore::new(dir.path())));
    assert!(reopened.is_blacklisted("openai", &tool).await);
}
