//! The turn loop (C5): orchestrates the model-stream adapter (C3) and the
//! tool executor (C4) across many turns, injecting queued steering/follow-up
//! messages and deciding when a run stops. See spec §4.5 for the state
//! machine this function implements almost line for line.

use crate::adapter::{self, AdapterOptions};
use crate::context::{self, CompactionStrategy, ContextConfig, ExecutionLimits, ExecutionTracker};
use crate::event_stream::EventSink;
use crate::events::AgentEvent;
use crate::executor::{self, ToolCallSpec};
use crate::hooks::HookRegistry;
use crate::provider::{StreamProvider, ToolDefinition};
use crate::tool::AgentTool;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Projects the full conversation into the `Message` list sent to the
/// provider. The default keeps only LLM-visible messages and strips thinking
/// parts (they are observation-only, never echoed back).
pub type ConvertToLlmFn = dyn Fn(&[AgentMessage]) -> Vec<Message> + Send + Sync;

/// A run's scoped state. The façade hands the loop its own copy of the
/// conversation and active tool set (taken out via `mem::take`/cloned before
/// the run, restored after) rather than a mutable borrow, since the loop
/// also needs a shared borrow of the façade's other fields (provider,
/// hooks, queues) for the duration of the same call.
pub struct RunContext {
    pub system_prompt: String,
    pub messages: Vec<AgentMessage>,
    pub tools: HashMap<String, Arc<dyn AgentTool>>,
}

/// Everything the loop needs to drive one run, independent of façade state.
pub struct RunConfig<'a> {
    pub provider: &'a dyn StreamProvider,
    pub model: String,
    pub provider_name: String,
    pub api_key: String,
    pub thinking_level: ThinkingLevel,
    pub thinking_budget: Option<u32>,
    pub cache: CacheConfig,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub retry: crate::retry::RetryConfig,

    pub convert_to_llm: Option<&'a ConvertToLlmFn>,
    pub hooks: Arc<std::sync::Mutex<HookRegistry>>,

    pub get_steering_messages: Box<dyn Fn() -> Vec<AgentMessage> + Send + Sync>,
    pub get_follow_up_messages: Box<dyn Fn() -> Vec<AgentMessage> + Send + Sync>,

    pub context_config: Option<ContextConfig>,
    pub compaction: Arc<dyn CompactionStrategy>,
    pub execution_limits: Option<ExecutionLimits>,
}

/// Runs `prompt`-style entry: appends `initial` to the conversation as the
/// first turn's user messages, then drives the loop. Returns the messages
/// newly appended during this run (the `agent_end.messages` payload).
pub async fn run_prompt(
    initial: Vec<AgentMessage>,
    ctx: &mut RunContext,
    config: &RunConfig<'_>,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Vec<AgentMessage> {
    let mut new_messages = Vec::new();
    sink.emit(AgentEvent::AgentStart);
    sink.emit(AgentEvent::TurnStart);

    append_messages(&mut ctx.messages, &mut new_messages, initial, sink);

    run_inner(ctx, config, sink, cancel, true, &mut new_messages).await;

    sink.emit(AgentEvent::AgentEnd { messages: new_messages.clone() });
    new_messages
}

/// Runs `continue`-style entry: no new initial messages, resumes from the
/// conversation's current tail. Caller must have already checked the last
/// message isn't an assistant message (see `Agent::continue_run`).
pub async fn run_continue(
    ctx: &mut RunContext,
    config: &RunConfig<'_>,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Vec<AgentMessage> {
    let mut new_messages = Vec::new();
    sink.emit(AgentEvent::AgentStart);
    sink.emit(AgentEvent::TurnStart);

    run_inner(ctx, config, sink, cancel, true, &mut new_messages).await;

    sink.emit(AgentEvent::AgentEnd { messages: new_messages.clone() });
    new_messages
}

fn append_messages(
    conversation: &mut Vec<AgentMessage>,
    new_messages: &mut Vec<AgentMessage>,
    batch: Vec<AgentMessage>,
    sink: &EventSink,
) {
    for message in batch {
        sink.emit(AgentEvent::MessageStart { message: message.clone() });
        sink.emit(AgentEvent::MessageEnd { message: message.clone() });
        conversation.push(message.clone());
        new_messages.push(message);
    }
}

/// The outer (follow-up) / inner (steering + tool-calls) loop described in
/// spec §4.5. `turn_start` for the very first turn is emitted by the caller;
/// this function emits every subsequent one.
async fn run_inner(
    ctx: &mut RunContext,
    config: &RunConfig<'_>,
    sink: &EventSink,
    cancel: &CancellationToken,
    mut first_turn: bool,
    new_messages: &mut Vec<AgentMessage>,
) {
    let mut tracker = config.execution_limits.clone().map(ExecutionTracker::new);
    let mut pending = (config.get_steering_messages)();

    'outer: loop {
        let mut had_tool_calls = true; // force at least one inner iteration
        while had_tool_calls || !pending.is_empty() {
            if cancel.is_cancelled() {
                return;
            }

            if !first_turn {
                sink.emit(AgentEvent::TurnStart);
            }
            first_turn = false;

            let batch = std::mem::take(&mut pending);
            append_messages(&mut ctx.messages, new_messages, batch, sink);

            if let Some(tracker) = tracker.as_ref() {
                if let Some(reason) = tracker.check_limits() {
                    let halt = context::limit_exceeded_message(&reason);
                    append_messages(&mut ctx.messages, new_messages, vec![halt], sink);
                    return;
                }
            }

            if let Some(cfg) = &config.context_config {
                let compacted =
                    context::compact_messages(ctx.messages.clone(), cfg, config.compaction.as_ref());
                ctx.messages = compacted;
            }

            let messages_for_llm = {
                let conversation = ctx.messages.clone();
                let transformed = run_transform_context(&config.hooks, conversation, cancel).await;
                match &config.convert_to_llm {
                    Some(f) => f(&transformed),
                    None => default_convert_to_llm(&transformed),
                }
            };

            let tool_defs: Vec<ToolDefinition> = ctx
                .tools
                .values()
                .map(|t| ToolDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                })
                .collect();

            let adapter_opts = AdapterOptions {
                model: config.model.clone(),
                provider_name: config.provider_name.clone(),
                api_key: config.api_key.clone(),
                thinking_level: config.thinking_level,
                thinking_budget: config.thinking_budget,
                cache: config.cache.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                retry: config.retry.clone(),
            };

            let assistant_message = adapter::stream_assistant_message(
                &messages_for_llm,
                &ctx.system_prompt,
                &tool_defs,
                config.provider,
                &adapter_opts,
                sink,
                cancel,
            )
            .await;

            let turn_tokens = context::message_tokens(&AgentMessage::Llm(assistant_message.clone()));
            if let Some(tracker) = tracker.as_mut() {
                tracker.record_turn(turn_tokens);
            }

            let agent_message: AgentMessage = assistant_message.clone().into();
            ctx.messages.push(agent_message.clone());
            new_messages.push(agent_message.clone());

            if matches!(
                assistant_message,
                Message::Assistant { stop_reason: StopReason::Error, .. }
                    | Message::Assistant { stop_reason: StopReason::Aborted, .. }
            ) {
                sink.emit(AgentEvent::TurnEnd { message: agent_message, tool_results: vec![] });
                return;
            }

            let tool_calls = extract_tool_calls(&assistant_message);
            had_tool_calls = !tool_calls.is_empty();
            let mut tool_results = Vec::new();
            let mut steering_after_tools = None;

            if had_tool_calls {
                let get_steering = &config.get_steering_messages;
                let drain: &dyn Fn() -> Vec<AgentMessage> = get_steering.as_ref();
                let hooks = config.hooks.lock().unwrap().clone();
                let outcome = executor::execute_tool_calls(
                    &tool_calls,
                    &ctx.tools,
                    &hooks,
                    sink,
                    cancel,
                    Some(drain),
                )
                .await;

                tool_results = outcome.tool_results;
                steering_after_tools = outcome.steering_after_tools;

                for result in &tool_results {
                    let am: AgentMessage = result.clone().into();
                    ctx.messages.push(am.clone());
                    new_messages.push(am);
                }
            }

            sink.emit(AgentEvent::TurnEnd { message: agent_message, tool_results });

            pending = match steering_after_tools {
                Some(steering) if !steering.is_empty() => steering,
                _ => (config.get_steering_messages)(),
            };
        }

        let follow_ups = (config.get_follow_up_messages)();
        if follow_ups.is_empty() {
            break 'outer;
        }
        pending = follow_ups;
    }
}

/// Clones the registry before awaiting any of its hooks, since a
/// `std::sync::MutexGuard` can't be held across an await point.
async fn run_transform_context(
    hooks: &Arc<std::sync::Mutex<HookRegistry>>,
    messages: Vec<AgentMessage>,
    cancel: &CancellationToken,
) -> Vec<AgentMessage> {
    let snapshot = hooks.lock().unwrap().clone();
    snapshot.run_transform_context(messages, cancel).await
}

fn extract_tool_calls(message: &Message) -> Vec<ToolCallSpec> {
    message
        .tool_calls()
        .into_iter()
        .map(|(id, name, arguments)| ToolCallSpec {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.clone(),
        })
        .collect()
}
