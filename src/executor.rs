//! Tool executor (C4): runs the tool calls in one assistant message, applies
//! `beforeToolCall` / `afterToolResult` hooks, and handles the steering
//! interrupt that can cut a turn's remaining tool calls short.

use crate::event_stream::EventSink;
use crate::events::AgentEvent;
use crate::hooks::{BeforeToolCallDecision, HookRegistry, PendingToolCall};
use crate::tool::{AgentTool, ToolError, ToolResult, ToolUpdateFn};
use crate::types::{now_ms, AgentMessage, Content, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One tool-call part extracted from an assistant message, in positional
/// order.
#[derive(Debug, Clone)]
pub struct ToolCallSpec {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

pub struct ToolExecutionOutcome {
    pub tool_results: Vec<Message>,
    /// Non-empty only when a steering message arrived mid-turn and cut the
    /// remaining tool calls short; becomes the turn loop's next `pending`.
    pub steering_after_tools: Option<Vec<AgentMessage>>,
}

const SKIPPED_TEXT: &str = "Skipped due to queued user message.";

/// Runs `calls` sequentially against `tools`, emitting `tool_execution_*` and
/// the paired `message_start`/`message_end` for each resulting tool-result
/// message.
pub async fn execute_tool_calls(
    calls: &[ToolCallSpec],
    tools: &HashMap<String, Arc<dyn AgentTool>>,
    hooks: &HookRegistry,
    sink: &EventSink,
    cancel: &CancellationToken,
    drain_steering: Option<&dyn Fn() -> Vec<AgentMessage>>,
) -> ToolExecutionOutcome {
    let mut tool_results = Vec::with_capacity(calls.len());
    let mut steering_after_tools = None;

    let mut index = 0;
    while index < calls.len() {
        let call = &calls[index];
        index += 1;

        let result_message = run_one(call, tools, hooks, sink, cancel).await;
        tool_results.push(result_message);

        if let Some(drain) = drain_steering {
            let steering = drain();
            if !steering.is_empty() {
                steering_after_tools = Some(steering);
                for skipped in &calls[index..] {
                    tool_results.push(skip_one(skipped, sink));
                }
                break;
            }
        }
    }

    ToolExecutionOutcome {
        tool_results,
        steering_after_tools,
    }
}

async fn run_one(
    call: &ToolCallSpec,
    tools: &HashMap<String, Arc<dyn AgentTool>>,
    hooks: &HookRegistry,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Message {
    sink.emit(AgentEvent::ToolExecutionStart {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        args: call.arguments.clone(),
    });

    let pending = PendingToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
    };

    let (result, is_error, resolved_call) = match hooks.run_before_tool_call(pending).await {
        BeforeToolCallDecision::Block(blocked_message) => {
            let (content, is_error) = match &blocked_message {
                Message::ToolResult { content, is_error, .. } => (content.clone(), *is_error),
                other => (vec![Content::text(summarize_message(other))], false),
            };
            (ToolResult { content, details: serde_json::Value::Null }, is_error, call.clone())
        }
        BeforeToolCallDecision::Continue(rewritten) => {
            let effective = rewritten
                .map(|r| ToolCallSpec { id: r.id, name: r.name, arguments: r.arguments })
                .unwrap_or_else(|| call.clone());
            let (result, is_error) = invoke(&effective, tools, sink, cancel).await;
            (result, is_error, effective)
        }
    };

    sink.emit(AgentEvent::ToolExecutionEnd {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        result: result.clone(),
        is_error,
    });

    let result_message = Message::ToolResult {
        tool_call_id: call.id.clone(),
        tool_name: resolved_call.name.clone(),
        content: result.content,
        is_error,
        timestamp: now_ms(),
    };

    let pending = PendingToolCall {
        id: resolved_call.id,
        name: resolved_call.name,
        arguments: resolved_call.arguments,
    };
    let result_message = hooks.run_after_tool_result(&pending, result_message).await;

    sink.emit(AgentEvent::MessageStart { message: result_message.clone().into() });
    sink.emit(AgentEvent::MessageEnd { message: result_message.clone().into() });

    result_message
}

async fn invoke(
    call: &ToolCallSpec,
    tools: &HashMap<String, Arc<dyn AgentTool>>,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> (ToolResult, bool) {
    let Some(tool) = tools.get(&call.name) else {
        return (
            ToolResult::text(format!("Tool {} not found", call.name)),
            true,
        );
    };

    let sink = sink.clone();
    let id = call.id.clone();
    let name = call.name.clone();
    let on_update: ToolUpdateFn = Box::new(move |partial: ToolResult| {
        sink.emit(AgentEvent::ToolExecutionUpdate {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            partial_result: partial,
        });
    });

    match tool
        .execute(&call.id, call.arguments.clone(), cancel.child_token(), Some(on_update))
        .await
    {
        Ok(result) => (result, false),
        Err(err) => (ToolResult::text(tool_error_text(&err)), true),
    }
}

fn tool_error_text(err: &ToolError) -> String {
    err.to_string()
}

fn skip_one(call: &ToolCallSpec, sink: &EventSink) -> Message {
    sink.emit(AgentEvent::ToolExecutionStart {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        args: call.arguments.clone(),
    });

    let result = ToolResult::text(SKIPPED_TEXT);

    sink.emit(AgentEvent::ToolExecutionEnd {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        result: result.clone(),
        is_error: true,
    });

    let message = Message::ToolResult {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        content: result.content,
        is_error: true,
        timestamp: now_ms(),
    };

    sink.emit(AgentEvent::MessageStart { message: message.clone().into() });
    sink.emit(AgentEvent::MessageEnd { message: message.clone().into() });

    message
}

fn summarize_message(message: &Message) -> String {
    match message {
        Message::User { content, .. } | Message::Assistant { content, .. } => {
            crate::types::summarize_text(content)
        }
        Message::ToolResult { content, .. } => crate::types::summarize_text(content),
    }
}
