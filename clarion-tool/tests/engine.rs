use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clarion_tool::*;
use clarion_types::*;
use serde_json::{Value, json};

/// Records the order in which tools run.
struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl ToolDyn for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name, "records calls")
    }

    fn call_dyn<'a>(
        &'a self,
        input: Value,
        _ctx: &'a ToolContext,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(self.name.to_string());
            if input.get("fail").is_some() {
                return Err(ToolError::ExecutionFailed("asked to fail".into()));
            }
            Ok(ToolResultPayload::Text(format!("{} done", self.name)))
        })
    }
}

struct Sleeper;

impl ToolDyn for Sleeper {
    fn name(&self) -> &str {
        "sleep"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("sleep", "sleeps")
    }

    fn call_dyn<'a>(
        &'a self,
        _input: Value,
        _ctx: &'a ToolContext,
    ) -> BoxFuture<'a, Result<ToolResultPayload, ToolError>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResultPayload::Text("woke".into()))
        })
    }
}

/// Remote server returning MCP-shaped results.
struct FakeServer {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

#[async_trait]
impl RemoteToolService for FakeServer {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(vec![ToolDefinition::new("create_issue", "Open an issue")])
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push((tool.to_string(), arguments));
        Ok(json!({"content": [{"type": "text", "text": "issue #7 created"}]}))
    }
}

fn engine(log: &Arc<Mutex<Vec<String>>>) -> ToolExecutionEngine {
    let mut registry = ToolRegistry::new();
    for name in ["first", "second", "third"] {
        registry.register_dyn(Arc::new(Recorder {
            name,
            log: log.clone(),
        }));
    }
    registry.register_dyn(Arc::new(Sleeper));
    ToolExecutionEngine::new(Arc::new(registry))
}

#[tokio::test]
async fn executes_sequentially_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log);
    let calls = vec![
        ToolCallRequest::new("a", "third", "{}"),
        ToolCallRequest::new("b", "first", "{}"),
        ToolCallRequest::new("c", "second", "{}"),
    ];

    let results = engine.execute_all(&calls, &ToolContext::default()).await;

    assert_eq!(*log.lock().unwrap(), vec!["third", "first", "second"]);
    let ids: Vec<&str> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(results[0].display_content(), "third done");
    assert_eq!(results[0].metadata.as_ref().unwrap()["source"], "native");
}

#[tokio::test]
async fn execution_error_becomes_failed_result() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log);
    let result = engine
        .execute(
            &ToolCallRequest::new("a", "first", r#"{"fail":true}"#),
            &ToolContext::default(),
        )
        .await;
    assert!(!result.success);
    assert!(result.result.is_none());
    assert!(result.error.as_deref().unwrap().contains("asked to fail"));
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log);
    let result = engine
        .execute(&ToolCallRequest::new("a", "nope", "{}"), &ToolContext::default())
        .await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("tool not found: nope"));
    assert_eq!(result.metadata.as_ref().unwrap()["source"], "unresolved");
}

#[tokio::test]
async fn invalid_arguments_are_reported() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log);
    let result = engine
        .execute(&ToolCallRequest::new("a", "first", "{oops"), &ToolContext::default())
        .await;
    assert!(!result.success);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn remote_tools_resolve_by_prefix() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server_calls = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log).remote(
        "github",
        Arc::new(FakeServer {
            calls: server_calls.clone(),
        }),
    );

    let result = engine
        .execute(
            &ToolCallRequest::new("r1", "mcp_github_create_issue", r#"{"title":"bug"}"#),
            &ToolContext::default(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.display_content(), "issue #7 created");
    let meta = result.metadata.unwrap();
    assert_eq!(meta["source"], "remote");
    assert_eq!(meta["server"], "github");
    assert_eq!(
        *server_calls.lock().unwrap(),
        vec![("create_issue".to_string(), json!({"title": "bug"}))]
    );
}

#[tokio::test]
async fn native_name_wins_over_remote_prefix() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register_dyn(Arc::new(Recorder {
        name: "mcp_github_create_issue",
        log: log.clone(),
    }));
    let server_calls = Arc::new(Mutex::new(Vec::new()));
    let engine = ToolExecutionEngine::new(Arc::new(registry)).remote(
        "github",
        Arc::new(FakeServer {
            calls: server_calls.clone(),
        }),
    );

    let result = engine
        .execute(
            &ToolCallRequest::new("r1", "mcp_github_create_issue", "{}"),
            &ToolContext::default(),
        )
        .await;
    assert!(result.success);
    assert_eq!(log.lock().unwrap().len(), 1);
    assert!(server_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn definitions_include_qualified_remote_tools() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log).remote(
        "github",
        Arc::new(FakeServer {
            calls: Arc::new(Mutex::new(Vec::new())),
        }),
    );
    let names: Vec<String> = engine.definitions().await.into_iter().map(|d| d.name).collect();
    assert_eq!(
        names,
        vec!["first", "second", "sleep", "third", "mcp_github_create_issue"]
    );
}

#[tokio::test]
async fn cancellation_stops_new_calls() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log);
    let ctx = ToolContext::default();
    ctx.cancellation_token.cancel();

    let results = engine
        .execute_all(&[ToolCallRequest::new("a", "first", "{}")], &ctx)
        .await;
    assert!(results.is_empty());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn tool_timeout_bounds_slow_tools() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(&log).tool_timeout(Duration::from_millis(20));
    let result = engine
        .execute(&ToolCallRequest::new("s", "sleep", "{}"), &ToolContext::default())
        .await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
}
