//! Lifecycle callbacks example.
//!
//! Demonstrates:
//! - `on_before_turn` to log each turn as it starts
//! - `on_after_turn` to track token usage
//! - `on_error` to log errors
//!
//! Uses `MockProvider` so no API key is needed.
//!   cargo run --example callbacks

use futures::StreamExt;
use std::sync::{Arc, Mutex};
use turnloop::provider::mock::{MockProvider, MockResponse, MockToolCall};
use turnloop::{
    AgentEvent, AgentMessage, AgentTool, Content, Message, ToolError, ToolResult, ToolUpdateFn,
};
use turnloop::Agent;

struct GreetTool;

#[async_trait::async_trait]
impl AgentTool for GreetTool {
    fn name(&self) -> &str {
        "greet"
    }

    fn label(&self) -> &str {
        "Greet"
    }

    fn description(&self) -> &str {
        "Greets someone"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "name": {"type": "string"} },
            "required": ["name"],
        })
    }

    async fn execute(
        &self,
        _id: &str,
        params: serde_json::Value,
        _cancel: tokio_util::sync::CancellationToken,
        _on_update: Option<ToolUpdateFn>,
    ) -> Result<ToolResult, ToolError> {
        let name = params["name"].as_str().unwrap_or("stranger");
        Ok(ToolResult {
            content: vec![Content::text(format!("Hello, {name}!"))],
            details: serde_json::Value::Null,
        })
    }
}

#[tokio::main]
async fn main() {
    // Provider: tool call -> text response (2-turn conversation)
    let provider = MockProvider::new(vec![
        MockResponse::ToolCalls(vec![MockToolCall {
            name: "greet".into(),
            arguments: serde_json::json!({"name": "World"}),
        }]),
        MockResponse::Text("I greeted the world for you!".into()),
    ]);

    let turn_count = Arc::new(Mutex::new(0usize));
    let turn_count_log = turn_count.clone();

    let usage_log: Arc<Mutex<Vec<(usize, u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let usage_log_clone = usage_log.clone();

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = errors.clone();

    let mut agent = Agent::new(provider)
        .with_system_prompt("You are helpful.")
        .with_model("mock")
        .with_api_key("test")
        .with_tools(vec![Arc::new(GreetTool)]);

    agent.on_before_turn(move || {
        let mut n = turn_count_log.lock().unwrap();
        *n += 1;
        println!("[before_turn] turn={}", *n);
    });

    agent.on_after_turn(move |message: &AgentMessage, tool_results: &[Message]| {
        if let AgentMessage::Llm(Message::Assistant { usage, .. }) = message {
            let entry = (tool_results.len(), usage.input, usage.output);
            println!(
                "[after_turn]  tool_results={}, tokens: {} in / {} out",
                entry.0, entry.1, entry.2
            );
            usage_log_clone.lock().unwrap().push(entry);
        }
    });

    agent.on_error(move |err: &str| {
        println!("[on_error]    {err}");
        errors_clone.lock().unwrap().push(err.to_string());
    });

    println!("=== Running agent with callbacks ===\n");

    let mut stream = agent.prompt("Greet the world").await.expect("agent is idle");
    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::ToolExecutionStart { tool_name, .. } => {
                println!("  [tool: {tool_name}]");
            }
            AgentEvent::AgentEnd { .. } => println!(),
            _ => {}
        }
    }

    println!("=== Callback Summary ===");
    let log = usage_log.lock().unwrap();
    println!("after_turn called {} time(s)", log.len());
    for (i, (results, input, output)) in log.iter().enumerate() {
        println!("  Turn {i}: {results} tool results, {input} input / {output} output tokens");
    }

    let errs = errors.lock().unwrap();
    if errs.is_empty() {
        println!("No errors recorded.");
    } else {
        println!("{} error(s): {:?}", errs.len(), *errs);
    }
}
