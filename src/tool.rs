//! Tool definition — the interface local tools implement, plus the result
//! and error types the executor (`executor.rs`) deals in.

use crate::types::Content;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Callback a tool can invoke zero or more times while running, to stream a
/// partial result to observers before it finishes (`tool_execution_update`).
pub type ToolUpdateFn = Box<dyn Fn(ToolResult) + Send + Sync>;

/// A tool the agent can call. Implement this for your tools.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Unique tool name (used in LLM tool-use and `tool_call_id` routing).
    fn name(&self) -> &str;
    /// Human-readable label for UI surfaces. Defaults to `name()`.
    fn label(&self) -> &str {
        self.name()
    }
    /// Description sent to the model.
    fn description(&self) -> &str;
    /// JSON Schema constraining the tool-call arguments.
    fn parameters_schema(&self) -> serde_json::Value;
    /// Execute the tool. `on_update`, if provided, streams partial results.
    async fn execute(
        &self,
        tool_call_id: &str,
        params: serde_json::Value,
        cancel: tokio_util::sync::CancellationToken,
        on_update: Option<ToolUpdateFn>,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            details: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("Cancelled")]
    Cancelled,
}
