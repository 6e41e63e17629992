//! Anthropic Claude provider (Messages API with streaming). The sole real
//! backend carried through this crate — enough to demonstrate the provider
//! boundary; every other backend the teacher shipped was cut as out of scope.

use super::sse::{drive_sse, SseEvent};
use super::traits::*;
use crate::types::*;
use async_trait::async_trait;
use reqwest_eventsource::EventSource;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider;

#[async_trait]
impl StreamProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(
        &self,
        config: StreamConfig,
        tx: mpsc::UnboundedSender<StreamPart>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), ProviderError> {
        let body = build_request_body(&config);
        debug!(model = %config.model, "anthropic request");

        let client = reqwest::Client::new();
        let request = client
            .post(API_URL)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let es = EventSource::new(request).map_err(|e| ProviderError::Network(e.to_string()))?;

        let (sse_tx, mut sse_rx) = mpsc::unbounded_channel::<SseEvent>();
        let drive_handle = tokio::spawn(drive_sse(es, sse_tx, cancel.clone()));

        let mut usage = Usage::default();
        let mut tool_kinds: HashMap<usize, bool> = HashMap::new();
        let mut tool_json: HashMap<usize, String> = HashMap::new();
        let mut tool_meta: HashMap<usize, (String, String)> = HashMap::new();

        while let Some(msg) = sse_rx.recv().await {
            match msg.event.as_str() {
                "message_start" => {
                    if let Ok(data) = serde_json::from_str::<AnthropicMessageStart>(&msg.data) {
                        usage.input = data.message.usage.input_tokens;
                        usage.cache_read = data.message.usage.cache_read_input_tokens.unwrap_or(0);
                        usage.cache_write = data.message.usage.cache_creation_input_tokens.unwrap_or(0);
                    }
                }
                "content_block_start" => {
                    if let Ok(data) = serde_json::from_str::<AnthropicContentBlockStart>(&msg.data) {
                        let idx = data.index as usize;
                        match data.content_block {
                            AnthropicContentBlock::Text { .. } => {
                                let _ = tx.send(StreamPart::TextStart { index: idx });
                            }
                            AnthropicContentBlock::Thinking { .. } => {
                                let _ = tx.send(StreamPart::ReasoningStart { index: idx });
                            }
                            AnthropicContentBlock::ToolUse { id, name } => {
                                tool_kinds.insert(idx, true);
                                tool_json.insert(idx, String::new());
                                tool_meta.insert(idx, (id.clone(), name.clone()));
                                let _ = tx.send(StreamPart::ToolInputStart { index: idx, id, name });
                            }
                        }
                    }
                }
                "content_block_delta" => {
                    if let Ok(data) = serde_json::from_str::<AnthropicContentBlockDelta>(&msg.data) {
                        let idx = data.index as usize;
                        match data.delta {
                            AnthropicDelta::TextDelta { text } => {
                                let _ = tx.send(StreamPart::TextDelta { index: idx, delta: text });
                            }
                            AnthropicDelta::ThinkingDelta { thinking } => {
                                let _ = tx.send(StreamPart::ReasoningDelta { index: idx, delta: thinking });
                            }
                            AnthropicDelta::InputJsonDelta { partial_json } => {
                                if let Some(buf) = tool_json.get_mut(&idx) {
                                    buf.push_str(&partial_json);
                                }
                                let _ = tx.send(StreamPart::ToolInputDelta { index: idx, delta: partial_json });
                            }
                            AnthropicDelta::SignatureDelta { .. } => {}
                        }
                    }
                }
                "content_block_stop" => {
                    if let Ok(data) = serde_json::from_str::<serde_json::Value>(&msg.data) {
                        let idx = data["index"].as_u64().unwrap_or(0) as usize;
                        if tool_kinds.remove(&idx).is_some() {
                            let raw = tool_json.remove(&idx).unwrap_or_default();
                            let (id, name) = tool_meta.remove(&idx).unwrap_or_default();
                            let input = if raw.trim().is_empty() {
                                serde_json::json!({})
                            } else {
                                serde_json::from_str(&raw).unwrap_or(serde_json::json!({}))
                            };
                            let _ = tx.send(StreamPart::ToolCall { index: idx, id, name, input });
                        } else {
                            let _ = tx.send(StreamPart::TextEnd { index: idx });
                        }
                    }
                }
                "message_delta" => {
                    if let Ok(data) = serde_json::from_str::<AnthropicMessageDelta>(&msg.data) {
                        usage.output = data.usage.output_tokens;
                        let finish_reason = match data.delta.stop_reason.as_deref() {
                            Some("tool_use") => ProviderFinishReason::ToolCalls,
                            Some("max_tokens") => ProviderFinishReason::Length,
                            _ => ProviderFinishReason::Stop,
                        };
                        let _ = tx.send(StreamPart::FinishStep { usage: usage.clone() });
                        let _ = tx.send(StreamPart::Finish { finish_reason, total_usage: usage.clone() });
                    }
                }
                "message_stop" => break,
                "ping" => {}
                "error" => {
                    warn!(data = %msg.data, "anthropic stream error");
                    let _ = tx.send(StreamPart::Error { message: msg.data });
                    drive_handle.abort();
                    return Ok(());
                }
                other => {
                    debug!(event = other, "unhandled anthropic sse event");
                }
            }
        }

        match drive_handle.await {
            Ok(Err(err)) if err == "cancelled" => return Err(ProviderError::Cancelled),
            Ok(Err(err)) => {
                warn!(error = %err, "anthropic sse transport error");
                let _ = tx.send(StreamPart::Error { message: err });
            }
            Ok(Ok(())) | Err(_) => {}
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Anthropic API request types
// ---------------------------------------------------------------------------

fn build_request_body(config: &StreamConfig) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = Vec::new();

    for msg in &config.messages {
        match msg {
            Message::User { content, .. } => {
                messages.push(serde_json::json!({
                    "role": "user",
                    "content": content_to_anthropic(content),
                }));
            }
            Message::Assistant { content, .. } => {
                messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": content_to_anthropic(content),
                }));
            }
            Message::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let text = summarize_text(content);
                messages.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": text,
                        "is_error": is_error,
                    }],
                }));
            }
        }
    }

    let mut body = serde_json::json!({
        "model": config.model,
        "max_tokens": config.max_tokens.unwrap_or(8192),
        "stream": true,
        "messages": messages,
    });

    if !config.system_prompt.is_empty() {
        body["system"] = serde_json::json!(config.system_prompt);
    }

    if !config.tools.is_empty() {
        let tools: Vec<serde_json::Value> = config
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    if let Some(budget) = config.thinking_budget.filter(|_| config.thinking_level != ThinkingLevel::Off) {
        body["thinking"] = serde_json::json!({
            "type": "enabled",
            "budget_tokens": budget,
        });
    }

    if config.cache.enabled {
        if let Some(last) = body["messages"].as_array_mut().and_then(|m| m.last_mut()) {
            last["content"] = add_cache_control(last["content"].take());
        }
    }

    if let Some(temp) = config.temperature {
        body["temperature"] = serde_json::json!(temp);
    }

    body
}

fn add_cache_control(content: serde_json::Value) -> serde_json::Value {
    match content {
        serde_json::Value::Array(mut parts) => {
            if let Some(last) = parts.last_mut() {
                last["cache_control"] = serde_json::json!({"type": "ephemeral"});
            }
            serde_json::Value::Array(parts)
        }
        other => other,
    }
}

fn content_to_anthropic(content: &[Content]) -> Vec<serde_json::Value> {
    content
        .iter()
        .filter_map(|c| match c {
            Content::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
            Content::Image { data, mime_type } => Some(serde_json::json!({
                "type": "image",
                "source": {"type": "base64", "media_type": mime_type, "data": data},
            })),
            Content::Thinking { thinking, signature } => Some(serde_json::json!({
                "type": "thinking",
                "thinking": thinking,
                "signature": signature.as_deref().unwrap_or(""),
            })),
            Content::ToolCall { id, name, arguments } => Some(serde_json::json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": arguments,
            })),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Anthropic SSE payload shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AnthropicMessageStart {
    message: AnthropicMessageInfo,
}

#[derive(Deserialize)]
struct AnthropicMessageInfo {
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct AnthropicContentBlockStart {
    index: u64,
    content_block: AnthropicContentBlock,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
}

#[derive(Deserialize)]
struct AnthropicContentBlockDelta {
    index: u64,
    delta: AnthropicDelta,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta { signature: String },
}

#[derive(Deserialize)]
struct AnthropicMessageDelta {
    delta: AnthropicMessageDeltaInner,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicMessageDeltaInner {
    stop_reason: Option<String>,
}
