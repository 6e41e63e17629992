//! Model-stream adapter (C3): turns a provider's `StreamPart` sequence into
//! an incrementally-built assistant `Message`, emitting `message_start` /
//! `message_update` / `message_end` events as it goes.
//!
//! Resilience rules (see spec §4.3): a `*-delta` with no matching `*-start`
//! gets a synthesized start and a fresh content-part; a `tool-call` with no
//! prior `tool-input-start` gets a synthesized start+end at the same index;
//! provider errors and cancellation both still finalize the draft and emit a
//! matching `message_end`, never leaving a dangling `message_start`.

use crate::event_stream::EventSink;
use crate::events::{AgentEvent, AssistantMessageEvent};
use crate::provider::{
    ProviderError, ProviderFinishReason, StreamConfig, StreamPart, StreamProvider, ToolDefinition,
};
use crate::retry::{self, RetryConfig};
use crate::types::*;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Everything the adapter needs beyond the conversation itself.
pub struct AdapterOptions {
    pub model: String,
    pub provider_name: String,
    pub api_key: String,
    pub thinking_level: ThinkingLevel,
    pub thinking_budget: Option<u32>,
    pub cache: CacheConfig,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub retry: RetryConfig,
}

/// In-progress assistant message plus the side tables needed to assemble it
/// from indexed, possibly out-of-order provider parts.
struct Draft {
    content: Vec<Content>,
    model: String,
    provider: String,
    usage: Usage,
    started: bool,
    tool_raw_json: HashMap<usize, String>,
}

impl Draft {
    fn new(model: String, provider: String) -> Self {
        Self {
            content: Vec::new(),
            model,
            provider,
            usage: Usage::default(),
            started: false,
            tool_raw_json: HashMap::new(),
        }
    }

    fn snapshot(&self, stop_reason: StopReason, error_message: Option<String>) -> Message {
        Message::Assistant {
            content: self.content.clone(),
            stop_reason,
            model: self.model.clone(),
            provider: self.provider.clone(),
            usage: self.usage.clone(),
            timestamp: now_ms(),
            error_message,
        }
    }
}

/// Drives one provider call to completion and returns the finalized assistant
/// message. Always emits a balanced `message_start` / `message_end` pair,
/// even on immediate error or abort with no content at all.
pub async fn stream_assistant_message(
    messages: &[Message],
    system_prompt: &str,
    tools: &[ToolDefinition],
    provider: &dyn StreamProvider,
    opts: &AdapterOptions,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Message {
    let mut attempt: usize = 0;
    loop {
        attempt += 1;
        match try_once(messages, system_prompt, tools, provider, opts, sink, cancel).await {
            Ok(message) => return message,
            Err(failure) if failure.error.is_retryable() && !failure.had_started && attempt <= opts.retry.max_retries => {
                let delay = failure
                    .error
                    .retry_after()
                    .unwrap_or_else(|| opts.retry.delay_for_attempt(attempt));
                retry::log_retry(attempt, opts.retry.max_retries, &delay, &failure.error);
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(failure) => {
                let message = Message::Assistant {
                    content: failure.draft.content,
                    stop_reason: StopReason::Error,
                    model: opts.model.clone(),
                    provider: opts.provider_name.clone(),
                    usage: Usage::default(),
                    timestamp: now_ms(),
                    error_message: Some(failure.error.to_string()),
                };
                finalize(sink, failure.had_started, message.clone());
                return message;
            }
        }
    }
}

struct DraftSnapshot {
    content: Vec<Content>,
}

struct AttemptFailure {
    error: ProviderError,
    draft: DraftSnapshot,
    had_started: bool,
}

async fn try_once(
    messages: &[Message],
    system_prompt: &str,
    tools: &[ToolDefinition],
    provider: &dyn StreamProvider,
    opts: &AdapterOptions,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<Message, AttemptFailure> {
    let config = StreamConfig {
        model: opts.model.clone(),
        system_prompt: system_prompt.to_string(),
        messages: messages.to_vec(),
        tools: tools.to_vec(),
        thinking_level: opts.thinking_level,
        thinking_budget: opts.thinking_budget.or_else(|| opts.thinking_level.default_budget()),
        cache: opts.cache.clone(),
        api_key: opts.api_key.clone(),
        max_tokens: opts.max_tokens,
        temperature: opts.temperature,
    };

    let mut draft = Draft::new(opts.model.clone(), opts.provider_name.clone());
    let (parts_tx, mut parts_rx) = mpsc::unbounded_channel::<StreamPart>();
    let stream_fut = provider.stream(config, parts_tx, cancel.clone());
    tokio::pin!(stream_fut);

    let mut provider_result: Option<Result<(), ProviderError>> = None;
    let mut final_message: Option<Message> = None;

    loop {
        if final_message.is_some() {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled(), if provider_result.is_none() => {
                let msg = draft.snapshot(StopReason::Aborted, None);
                finalize(sink, draft.started, msg.clone());
                return Ok(msg);
            }
            part = parts_rx.recv() => {
                match part {
                    Some(part) => {
                        if let Some(msg) = apply_part(&mut draft, part, sink) {
                            final_message = Some(msg);
                        }
                    }
                    None => {
                        // Channel closed: drain is done, wait for the provider future.
                        if provider_result.is_none() {
                            provider_result = Some((&mut stream_fut).await);
                        }
                        break;
                    }
                }
            }
            res = &mut stream_fut, if provider_result.is_none() => {
                provider_result = Some(res);
            }
        }
    }

    // Drain anything buffered after the provider future resolved.
    while let Ok(part) = parts_rx.try_recv() {
        if final_message.is_none() {
            if let Some(msg) = apply_part(&mut draft, part, sink) {
                final_message = Some(msg);
            }
        }
    }

    if let Some(msg) = final_message {
        return Ok(msg);
    }

    match provider_result {
        Some(Ok(())) => {
            // Provider returned without sending `Finish` — treat as a clean
            // stop with whatever content arrived.
            let msg = draft.snapshot(StopReason::Stop, None);
            finalize(sink, draft.started, msg.clone());
            Ok(msg)
        }
        Some(Err(error)) => {
            let had_started = draft.started;
            Err(AttemptFailure {
                error,
                draft: DraftSnapshot { content: draft.content },
                had_started,
            })
        }
        None => {
            let msg = draft.snapshot(StopReason::Stop, None);
            finalize(sink, draft.started, msg.clone());
            Ok(msg)
        }
    }
}

fn finalize(sink: &EventSink, started: bool, message: Message) {
    let am: AgentMessage = message.clone().into();
    if !started {
        sink.emit(AgentEvent::MessageStart { message: am.clone() });
    }
    sink.emit(AgentEvent::MessageEnd { message: am });
}

/// Applies one provider part to `draft`, emitting the corresponding
/// `message_start` (on first content) and `message_update` events. Returns
/// `Some(message)` once a `Finish` or `Error` part finalizes the draft.
fn apply_part(draft: &mut Draft, part: StreamPart, sink: &EventSink) -> Option<Message> {
    ensure_started(draft, sink);

    match part {
        StreamPart::TextStart { index } => {
            push_placeholder(draft, index, Content::text(""));
            emit_update(draft, sink, AssistantMessageEvent::TextStart { index });
        }
        StreamPart::TextDelta { index, delta } => {
            ensure_text_started(draft, sink, index);
            if let Some(part) = draft.content.get_mut(index) {
                part.append_delta(&delta);
            }
            emit_update(draft, sink, AssistantMessageEvent::TextDelta { index, delta });
        }
        StreamPart::TextEnd { index } => {
            let content = draft.content.get(index).cloned().unwrap_or_else(|| Content::text(""));
            emit_update(draft, sink, AssistantMessageEvent::TextEnd { index, content });
        }
        StreamPart::ReasoningStart { index } => {
            push_placeholder(
                draft,
                index,
                Content::Thinking {
                    thinking: String::new(),
                    signature: None,
                },
            );
            emit_update(draft, sink, AssistantMessageEvent::ThinkingStart { index });
        }
        StreamPart::ReasoningDelta { index, delta } => {
            ensure_thinking_started(draft, sink, index);
            if let Some(part) = draft.content.get_mut(index) {
                part.append_delta(&delta);
            }
            emit_update(draft, sink, AssistantMessageEvent::ThinkingDelta { index, delta });
        }
        StreamPart::ReasoningEnd { index } => {
            let content = draft
                .content
                .get(index)
                .cloned()
                .unwrap_or_else(|| Content::Thinking { thinking: String::new(), signature: None });
            emit_update(draft, sink, AssistantMessageEvent::ThinkingEnd { index, content });
        }
        StreamPart::ToolInputStart { index, id, name } => {
            push_placeholder(
                draft,
                index,
                Content::ToolCall {
                    id,
                    name,
                    arguments: serde_json::Value::Null,
                },
            );
            draft.tool_raw_json.insert(index, String::new());
            emit_update(draft, sink, AssistantMessageEvent::ToolcallStart { index });
        }
        StreamPart::ToolInputDelta { index, delta } => {
            draft.tool_raw_json.entry(index).or_default().push_str(&delta);
            emit_update(draft, sink, AssistantMessageEvent::ToolcallDelta { index, delta });
        }
        StreamPart::ToolCall { index, id, name, input } => {
            let had_placeholder = index < draft.content.len();
            let final_part = Content::ToolCall {
                id,
                name,
                arguments: input,
            };
            if had_placeholder {
                draft.content[index] = final_part.clone();
            } else {
                push_placeholder(draft, index, final_part.clone());
                emit_update(draft, sink, AssistantMessageEvent::ToolcallStart { index });
            }
            draft.tool_raw_json.remove(&index);
            emit_update(
                draft,
                sink,
                AssistantMessageEvent::ToolcallEnd { index, content: final_part },
            );
        }
        StreamPart::FinishStep { usage } => {
            draft.usage = usage;
        }
        StreamPart::Finish { finish_reason, total_usage } => {
            draft.usage = total_usage;
            let has_tool_calls = draft.content.iter().any(|c| matches!(c, Content::ToolCall { .. }));
            let stop_reason = if has_tool_calls {
                StopReason::ToolUse
            } else {
                match finish_reason {
                    ProviderFinishReason::Length => StopReason::Length,
                    ProviderFinishReason::Error => StopReason::Error,
                    ProviderFinishReason::ToolCalls | ProviderFinishReason::Stop => StopReason::Stop,
                }
            };
            let msg = draft.snapshot(stop_reason, None);
            sink.emit(AgentEvent::MessageEnd { message: msg.clone().into() });
            return Some(msg);
        }
        StreamPart::Error { message } => {
            warn!(error = %message, "provider stream error");
            let msg = draft.snapshot(StopReason::Error, Some(message));
            sink.emit(AgentEvent::MessageEnd { message: msg.clone().into() });
            return Some(msg);
        }
    }
    None
}

fn ensure_started(draft: &mut Draft, sink: &EventSink) {
    if !draft.started {
        draft.started = true;
        let msg = draft.snapshot(StopReason::Stop, None);
        sink.emit(AgentEvent::MessageStart { message: msg.into() });
    }
}

fn push_placeholder(draft: &mut Draft, index: usize, part: Content) {
    if index < draft.content.len() {
        draft.content[index] = part;
    } else {
        while draft.content.len() < index {
            draft.content.push(Content::text(""));
        }
        draft.content.push(part);
    }
}

fn ensure_text_started(draft: &mut Draft, sink: &EventSink, index: usize) {
    if index >= draft.content.len() {
        push_placeholder(draft, index, Content::text(""));
        emit_update(draft, sink, AssistantMessageEvent::TextStart { index });
    }
}

fn ensure_thinking_started(draft: &mut Draft, sink: &EventSink, index: usize) {
    if index >= draft.content.len() {
        push_placeholder(
            draft,
            index,
            Content::Thinking { thinking: String::new(), signature: None },
        );
        emit_update(draft, sink, AssistantMessageEvent::ThinkingStart { index });
    }
}

fn emit_update(draft: &Draft, sink: &EventSink, event: AssistantMessageEvent) {
    let snapshot = draft.snapshot(StopReason::Stop, None);
    sink.emit(AgentEvent::MessageUpdate {
        message: snapshot.into(),
        assistant_message_event: event,
    });
}
