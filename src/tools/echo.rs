use crate::tool::{AgentTool, ToolError, ToolResult, ToolUpdateFn};
use crate::types::Content;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Echoes its `value` argument back as text. Minimal enough to use as a
/// fixture in turn-loop tests without pulling in any external effects.
#[derive(Debug, Default)]
pub struct EchoTool;

#[async_trait]
impl AgentTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the given value back as text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["value"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        params: Value,
        _cancel: CancellationToken,
        _on_update: Option<ToolUpdateFn>,
    ) -> Result<ToolResult, ToolError> {
        let value = params
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing \"value\"".to_string()))?;

        Ok(ToolResult {
            content: vec![Content::text(format!("echoed: {value}"))],
            details: json!({ "echoed": value }),
        })
    }
}
