//! Event types emitted on the agent's event stream (`event_stream.rs`).
//!
//! Every event carries a `type` discriminant. Lifecycle and message events bracket
//! a run; `assistantMessageEvent` carries the token-level deltas that build up one
//! in-progress assistant message.

use crate::types::{AgentMessage, Content, Message};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token-level events for one in-progress assistant message, indexed by content
/// part. Carried inside `AgentEvent::MessageUpdate.assistant_message_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssistantMessageEvent {
    TextStart { index: usize },
    TextDelta { index: usize, delta: String },
    TextEnd { index: usize, content: Content },

    ThinkingStart { index: usize },
    ThinkingDelta { index: usize, delta: String },
    ThinkingEnd { index: usize, content: Content },

    ToolcallStart { index: usize },
    ToolcallDelta { index: usize, delta: String },
    ToolcallEnd { index: usize, content: Content },
}

/// Every event observable on an agent run's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    AgentStart,
    TurnStart,
    TurnEnd {
        message: AgentMessage,
        #[serde(rename = "toolResults")]
        tool_results: Vec<Message>,
    },
    AgentEnd {
        messages: Vec<AgentMessage>,
    },

    MessageStart {
        message: AgentMessage,
    },
    MessageUpdate {
        message: AgentMessage,
        #[serde(rename = "assistantMessageEvent")]
        assistant_message_event: AssistantMessageEvent,
    },
    MessageEnd {
        message: AgentMessage,
    },

    ToolExecutionStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: Value,
    },
    ToolExecutionUpdate {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "partialResult")]
        partial_result: crate::tool::ToolResult,
    },
    ToolExecutionEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        result: crate::tool::ToolResult,
        #[serde(rename = "isError")]
        is_error: bool,
    },
}

impl AgentEvent {
    /// The stable name used for `on(name, fn)` subscription routing and for the
    /// catch-all `"event"` channel's label field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::TurnStart => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::AgentEnd { .. } => "agent_end",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionUpdate { .. } => "tool_execution_update",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
        }
    }
}
