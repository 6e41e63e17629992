//! The provider boundary: what the model-stream adapter (`adapter.rs`) consumes
//! from any LLM backend, and what it pushes back in return.

use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One chunk of a provider's stream, as seen by the adapter. Names mirror the
/// spec's table directly so the mapping in `adapter.rs` stays a straight match.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextStart { index: usize },
    TextDelta { index: usize, delta: String },
    TextEnd { index: usize },

    ReasoningStart { index: usize },
    ReasoningDelta { index: usize, delta: String },
    ReasoningEnd { index: usize },

    ToolInputStart { index: usize, id: String, name: String },
    ToolInputDelta { index: usize, delta: String },

    /// A final, fully-formed tool call. Replaces the placeholder part at
    /// `index` if one was opened with `ToolInputStart`, else is emitted as a
    /// self-contained start+end.
    ToolCall {
        index: usize,
        id: String,
        name: String,
        input: serde_json::Value,
    },

    FinishStep { usage: Usage },
    Finish { finish_reason: ProviderFinishReason, total_usage: Usage },

    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFinishReason {
    Stop,
    Length,
    ToolCalls,
    Error,
}

/// Configuration for one streaming completion call.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub thinking_level: ThinkingLevel,
    pub thinking_budget: Option<u32>,
    pub cache: CacheConfig,
    pub api_key: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Tool definition sent to the LLM (schema only, no execute fn).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The core provider trait. Implement this for each LLM backend.
///
/// `stream` pushes `StreamPart`s to `tx` as they arrive; the caller (the
/// adapter) assembles them into an in-progress `Message::Assistant` and emits
/// `message_update` events. The provider does not see or emit `AgentEvent`s
/// directly — that mapping is the adapter's job.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        config: StreamConfig,
        tx: mpsc::UnboundedSender<StreamPart>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}
