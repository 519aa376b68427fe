//! End-to-end tests of the conversation loop against scripted providers
//! and in-process tool servers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use mcp_agent::history::ContentBlock;
use mcp_agent::llm::{Orchestrator, Provider, ProviderError, ProviderMessage, Tool, ToolCall};
use mcp_agent::mcp::ToolServer;

/// Provider that replays a scripted sequence of results and counts calls.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderMessage, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<ProviderMessage, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn create_message(
        &self,
        _history: &[mcp_agent::history::HistoryMessage],
        _tools: &[Tool],
    ) -> Result<ProviderMessage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("provider called more often than scripted")
    }
}

enum ToolBehavior {
    Reply(Vec<Value>),
    Fail(String),
}

/// Tool server that records invocations and replies with fixed behavior.
struct FakeToolServer {
    behavior: ToolBehavior,
    calls: Mutex<Vec<(String, serde_json::Map<String, Value>)>>,
}

impl FakeToolServer {
    fn replying(content: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            behavior: ToolBehavior::Reply(content),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            behavior: ToolBehavior::Fail(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, serde_json::Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolServer for FakeToolServer {
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> anyhow::Result<Vec<Value>> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        match &self.behavior {
            ToolBehavior::Reply(content) => Ok(content.clone()),
            ToolBehavior::Fail(message) => Err(anyhow::anyhow!("{message}")),
        }
    }
}

fn text_message(text: &str) -> ProviderMessage {
    ProviderMessage {
        role: "assistant".to_string(),
        content: text.to_string(),
        tool_calls: Vec::new(),
    }
}

fn tool_call_message(text: &str, tool_calls: Vec<ToolCall>) -> ProviderMessage {
    ProviderMessage {
        role: "assistant".to_string(),
        content: text.to_string(),
        tool_calls,
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

fn servers<S: ToolServer + 'static>(name: &str, server: Arc<S>) -> HashMap<String, Arc<dyn ToolServer>> {
    HashMap::from([(name.to_string(), server as Arc<dyn ToolServer>)])
}

fn tool_results(orchestrator: &Orchestrator) -> Vec<(String, String)> {
    orchestrator
        .history()
        .iter()
        .flat_map(|message| &message.content)
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id, text, ..
            } => Some((tool_use_id.clone(), text.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn tool_result_text_is_flattened_and_loop_continues() {
    let provider = ScriptedProvider::new(vec![
        Ok(tool_call_message(
            "",
            vec![call("tc-1", "fs__list_dir", json!({"path": "."}))],
        )),
        Ok(text_message("two files: a.txt and b.txt")),
    ]);
    let fs = FakeToolServer::replying(vec![json!({"type": "text", "text": "a.txt b.txt"})]);

    let mut orchestrator = Orchestrator::new(
        provider.clone(),
        servers("fs", fs.clone()),
        Vec::new(),
    );
    let answer = orchestrator.run("list files").await.unwrap();

    assert_eq!(answer, "two files: a.txt and b.txt");
    // Exactly one extra provider call after the tool-result batch.
    assert_eq!(provider.calls(), 2);

    // The namespaced name was routed to the raw tool name.
    let tool_calls = fs.calls();
    assert_eq!(tool_calls.len(), 1);
    assert_eq!(tool_calls[0].0, "list_dir");
    assert_eq!(tool_calls[0].1["path"], json!("."));

    assert_eq!(
        tool_results(&orchestrator),
        vec![("tc-1".to_string(), "a.txt b.txt".to_string())]
    );
}

#[tokio::test]
async fn unknown_server_is_skipped_and_turn_terminates() {
    let provider = ScriptedProvider::new(vec![Ok(tool_call_message(
        "fallback answer",
        vec![call("tc-1", "unknownserver__foo", json!({}))],
    ))]);

    let mut orchestrator = Orchestrator::new(provider.clone(), HashMap::new(), Vec::new());
    let answer = orchestrator.run("do something").await.unwrap();

    // No tool_result was produced, so the turn terminated with the model's
    // original text after a single provider call.
    assert_eq!(answer, "fallback answer");
    assert_eq!(provider.calls(), 1);
    assert!(tool_results(&orchestrator).is_empty());

    // The tool_use block is still recorded in history.
    let tool_uses = orchestrator
        .history()
        .iter()
        .flat_map(|message| &message.content)
        .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
        .count();
    assert_eq!(tool_uses, 1);
}

#[tokio::test]
async fn malformed_tool_name_is_dropped_silently() {
    let provider = ScriptedProvider::new(vec![Ok(tool_call_message(
        "plain answer",
        vec![call("tc-1", "notnamespaced", json!({}))],
    ))]);
    let fs = FakeToolServer::replying(vec![]);

    let mut orchestrator = Orchestrator::new(
        provider.clone(),
        servers("fs", fs.clone()),
        Vec::new(),
    );
    let answer = orchestrator.run("go").await.unwrap();

    assert_eq!(answer, "plain answer");
    assert_eq!(provider.calls(), 1);
    assert!(fs.calls().is_empty());
    assert!(tool_results(&orchestrator).is_empty());
}

#[tokio::test]
async fn non_object_arguments_are_dropped_silently() {
    let provider = ScriptedProvider::new(vec![Ok(tool_call_message(
        "still fine",
        vec![call("tc-1", "fs__list_dir", Value::String("{oops".to_string()))],
    ))]);
    let fs = FakeToolServer::replying(vec![]);

    let mut orchestrator = Orchestrator::new(
        provider.clone(),
        servers("fs", fs.clone()),
        Vec::new(),
    );
    let answer = orchestrator.run("go").await.unwrap();

    assert_eq!(answer, "still fine");
    assert_eq!(provider.calls(), 1);
    assert!(fs.calls().is_empty());
}

#[tokio::test]
async fn tool_failure_becomes_model_visible_result() {
    let provider = ScriptedProvider::new(vec![
        Ok(tool_call_message(
            "",
            vec![call("tc-1", "db__query", json!({"sql": "select 1"}))],
        )),
        Ok(text_message("done")),
    ]);
    let db = FakeToolServer::failing("connection refused");

    let mut orchestrator = Orchestrator::new(
        provider.clone(),
        servers("db", db.clone()),
        Vec::new(),
    );
    let answer = orchestrator.run("query the db").await.unwrap();

    // The failure did not terminate the conversation.
    assert_eq!(answer, "done");
    assert_eq!(provider.calls(), 2);

    let results = tool_results(&orchestrator);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "tc-1");
    assert!(results[0].1.contains("query"));
    assert!(results[0].1.contains("connection refused"));
}

#[tokio::test]
async fn tool_calls_dispatch_in_provider_order() {
    let provider = ScriptedProvider::new(vec![
        Ok(tool_call_message(
            "working on it",
            vec![
                call("tc-1", "fs__read_file", json!({"path": "a.txt"})),
                call("tc-2", "fs__read_file", json!({"path": "b.txt"})),
            ],
        )),
        Ok(text_message("both read")),
    ]);
    let fs = FakeToolServer::replying(vec![json!({"type": "text", "text": "contents"})]);

    let mut orchestrator = Orchestrator::new(
        provider.clone(),
        servers("fs", fs.clone()),
        Vec::new(),
    );
    let answer = orchestrator.run("read both files").await.unwrap();

    assert_eq!(answer, "both read");
    assert_eq!(provider.calls(), 2);

    let tool_calls = fs.calls();
    assert_eq!(tool_calls.len(), 2);
    assert_eq!(tool_calls[0].1["path"], json!("a.txt"));
    assert_eq!(tool_calls[1].1["path"], json!("b.txt"));

    // Results appear in dispatch order, matching the history ordering the
    // model will see.
    let results = tool_results(&orchestrator);
    assert_eq!(results[0].0, "tc-1");
    assert_eq!(results[1].0, "tc-2");
}

#[tokio::test(start_paused = true)]
async fn overload_budget_exhaustion_is_terminal() {
    let provider = ScriptedProvider::new(
        (0..6)
            .map(|i| Err(ProviderError::Overloaded(format!("overloaded_error {i}"))))
            .collect(),
    );

    let mut orchestrator = Orchestrator::new(provider.clone(), HashMap::new(), Vec::new());
    let err = orchestrator.run("hello").await.unwrap_err();

    // The terminal error is the user-facing overload message, not the raw
    // provider error, and no sixth backoff sleep happens after the budget
    // is spent.
    assert!(err.to_string().contains("overloaded"));
    assert!(!err.to_string().contains("overloaded_error"));
    assert_eq!(provider.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn overload_recovers_within_budget() {
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::Overloaded("overloaded_error".to_string())),
        Err(ProviderError::Overloaded("overloaded_error".to_string())),
        Ok(text_message("finally")),
    ]);

    let mut orchestrator = Orchestrator::new(provider.clone(), HashMap::new(), Vec::new());
    let answer = orchestrator.run("hello").await.unwrap();

    assert_eq!(answer, "finally");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn non_transient_provider_error_returns_immediately() {
    let provider = ScriptedProvider::new(vec![Err(ProviderError::Api {
        status: 401,
        body: "bad key".to_string(),
    })]);

    let mut orchestrator = Orchestrator::new(provider.clone(), HashMap::new(), Vec::new());
    let err = orchestrator.run("hello").await.unwrap_err();

    assert!(err.to_string().contains("401"));
    assert_eq!(provider.calls(), 1);
}
