//! Tests for the turn loop (`agent_loop`) using `MockProvider`, driven
//! directly against `RunContext`/`RunConfig` rather than through the `Agent`
//! façade.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use turnloop::agent_loop::{run_continue, run_prompt, RunConfig, RunContext};
use turnloop::context::{CompactionStrategy, DefaultCompaction};
use turnloop::provider::mock::{MockProvider, MockResponse, MockToolCall};
use turnloop::*;

fn make_config(provider: &MockProvider) -> RunConfig<'_> {
    RunConfig {
        provider,
        model: "mock".into(),
        provider_name: "mock".into(),
        api_key: "test".into(),
        thinking_level: ThinkingLevel::Off,
        thinking_budget: None,
        cache: CacheConfig::default(),
        max_tokens: None,
        temperature: None,
        retry: RetryConfig::default(),
        convert_to_llm: None,
        hooks: Arc::new(Mutex::new(HookRegistry::new())),
        get_steering_messages: Box::new(Vec::new),
        get_follow_up_messages: Box::new(Vec::new),
        context_config: None,
        compaction: Arc::new(DefaultCompaction) as Arc<dyn CompactionStrategy>,
        execution_limits: None,
    }
}

fn make_context(tools: Vec<Arc<dyn AgentTool>>) -> RunContext {
    let mut map = HashMap::new();
    for tool in tools {
        map.insert(tool.name().to_string(), tool);
    }
    RunContext {
        system_prompt: "You are helpful.".into(),
        messages: Vec::new(),
        tools: map,
    }
}

struct ReadFileTool;

#[async_trait::async_trait]
impl AgentTool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read a file"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": { "path": {"type": "string"} } })
    }
    async fn execute(
        &self,
        _tool_call_id: &str,
        _params: serde_json::Value,
        _cancel: tokio_util::sync::CancellationToken,
        _on_update: Option<ToolUpdateFn>,
    ) -> Result<ToolResult, ToolError> {
        Ok(ToolResult {
            content: vec![Content::text("hello")],
            details: serde_json::Value::Null,
        })
    }
}

struct FailingTool;

#[async_trait::async_trait]
impl AgentTool for FailingTool {
    fn name(&self) -> &str {
        "failing_tool"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({})
    }
    async fn execute(
        &self,
        _id: &str,
        _params: serde_json::Value,
        _cancel: tokio_util::sync::CancellationToken,
        _on_update: Option<ToolUpdateFn>,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::Failed("Something went wrong".into()))
    }
}

// S1: simple text response.
#[tokio::test]
async fn simple_text_response() {
    let provider = MockProvider::text("Hello, world!");
    let config = make_config(&provider);
    let mut context = make_context(Vec::new());

    let (sink, mut stream) = event_stream::channel(config.hooks.clone());
    let cancel = CancellationToken::new();
    let prompt = AgentMessage::Llm(Message::user("Hi"));

    let new_messages = run_prompt(vec![prompt], &mut context, &config, &sink, &cancel).await;
    drop(sink);

    let mut names = Vec::new();
    while let Some(event) = stream.next().await {
        names.push(event.name().to_string());
    }

    assert!(names.contains(&"agent_start".to_string()));
    assert!(names.contains(&"agent_end".to_string()));
    assert!(names.contains(&"turn_start".to_string()));
    assert!(names.contains(&"turn_end".to_string()));

    assert_eq!(new_messages.len(), 2);
    assert_eq!(new_messages[0].role(), "user");
    assert_eq!(new_messages[1].role(), "assistant");
    assert_eq!(context.messages.len(), 2);
}

// S2: tool call then a text response.
#[tokio::test]
async fn tool_call_and_response() {
    let provider = MockProvider::new(vec![
        MockResponse::ToolCalls(vec![MockToolCall {
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "test.txt"}),
        }]),
        MockResponse::Text("The file contains: hello".into()),
    ]);
    let config = make_config(&provider);
    let mut context = make_context(vec![Arc::new(ReadFileTool)]);

    let (sink, mut stream) = event_stream::channel(config.hooks.clone());
    let cancel = CancellationToken::new();
    let prompt = AgentMessage::Llm(Message::user("Read test.txt"));

    let new_messages = run_prompt(vec![prompt], &mut context, &config, &sink, &cancel).await;
    drop(sink);

    let mut names = Vec::new();
    while let Some(event) = stream.next().await {
        names.push(event.name().to_string());
    }
    assert!(names.contains(&"tool_execution_start".to_string()));
    assert!(names.contains(&"tool_execution_end".to_string()));

    assert_eq!(new_messages.len(), 4);
    assert_eq!(new_messages[0].role(), "user");
    assert_eq!(new_messages[1].role(), "assistant");
    assert_eq!(new_messages[2].role(), "toolResult");
    assert_eq!(new_messages[3].role(), "assistant");
}

// S3: abort cancels the loop.
#[tokio::test]
async fn abort_cancels_loop() {
    let provider = MockProvider::text("Should not appear");
    let config = make_config(&provider);
    let mut context = make_context(Vec::new());

    let (sink, _stream) = event_stream::channel(config.hooks.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let prompt = AgentMessage::Llm(Message::user("Hi"));

    let new_messages = run_prompt(vec![prompt], &mut context, &config, &sink, &cancel).await;

    // The prompt is appended before the cancellation check, so at most the
    // user message makes it in.
    assert!(new_messages.len() <= 1);
}

// S4: continue from a dangling tool result.
#[tokio::test]
async fn continue_from_tool_result() {
    let provider = MockProvider::text("Done processing.");
    let config = make_config(&provider);
    let mut context = make_context(Vec::new());
    context.messages = vec![
        AgentMessage::Llm(Message::user("do something")),
        AgentMessage::Llm(Message::ToolResult {
            tool_call_id: "tc-1".into(),
            tool_name: "test_tool".into(),
            content: vec![Content::text("result")],
            is_error: false,
            timestamp: 0,
        }),
    ];

    let (sink, _stream) = event_stream::channel(config.hooks.clone());
    let cancel = CancellationToken::new();

    let new_messages = run_continue(&mut context, &config, &sink, &cancel).await;

    assert!(!new_messages.is_empty());
    assert_eq!(new_messages[0].role(), "assistant");
}

// S5: tool error is reported but the run recovers.
#[tokio::test]
async fn tool_error_is_reported() {
    let provider = MockProvider::new(vec![
        MockResponse::ToolCalls(vec![MockToolCall {
            name: "failing_tool".into(),
            arguments: serde_json::json!({}),
        }]),
        MockResponse::Text("Tool failed, sorry.".into()),
    ]);
    let config = make_config(&provider);
    let mut context = make_context(vec![Arc::new(FailingTool)]);

    let (sink, mut stream) = event_stream::channel(config.hooks.clone());
    let cancel = CancellationToken::new();
    let prompt = AgentMessage::Llm(Message::user("Use the tool"));

    let new_messages = run_prompt(vec![prompt], &mut context, &config, &sink, &cancel).await;
    drop(sink);

    let mut error_ends = 0;
    while let Some(event) = stream.next().await {
        if matches!(event, AgentEvent::ToolExecutionEnd { is_error: true, .. }) {
            error_ends += 1;
        }
    }
    assert_eq!(error_ends, 1);
    assert_eq!(new_messages.last().unwrap().role(), "assistant");
}

// S6: unknown tool name reports an error result.
#[tokio::test]
async fn unknown_tool_reports_error() {
    let provider = MockProvider::new(vec![
        MockResponse::ToolCalls(vec![MockToolCall {
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        }]),
        MockResponse::Text("I couldn't find that tool.".into()),
    ]);
    let config = make_config(&provider);
    let mut context = make_context(Vec::new());

    let (sink, mut stream) = event_stream::channel(config.hooks.clone());
    let cancel = CancellationToken::new();
    let prompt = AgentMessage::Llm(Message::user("Use nonexistent tool"));

    let _new_messages = run_prompt(vec![prompt], &mut context, &config, &sink, &cancel).await;
    drop(sink);

    let mut error_ends = 0;
    while let Some(event) = stream.next().await {
        if matches!(event, AgentEvent::ToolExecutionEnd { is_error: true, .. }) {
            error_ends += 1;
        }
    }
    assert_eq!(error_ends, 1);
}
