use crate::tool::{AgentTool, ToolError, ToolResult, ToolUpdateFn};
use crate::types::{now_ms, Content};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Reports the current wall-clock time. A second trivial tool alongside
/// `EchoTool`, used to exercise multi-tool-call turns in tests.
#[derive(Debug, Default)]
pub struct ClockTool;

#[async_trait]
impl AgentTool for ClockTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Returns the current time as Unix epoch milliseconds."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _params: Value,
        _cancel: CancellationToken,
        _on_update: Option<ToolUpdateFn>,
    ) -> Result<ToolResult, ToolError> {
        let now = now_ms();
        Ok(ToolResult {
            content: vec![Content::text(now.to_string())],
            details: json!({ "epochMs": now }),
        })
    }
}
