//! Stateful `Agent` façade (C6) — wraps the turn loop with conversation
//! state, tool registry, steering/follow-up queues, and abort support.

use crate::agent_loop::{self, ConvertToLlmFn, RunConfig, RunContext};
use crate::context::{CompactionStrategy, ContextConfig, DefaultCompaction, ExecutionLimits};
use crate::event_stream::{self, AgentEventStream};
use crate::events::AgentEvent;
use crate::extension::ExtensionApi;
use crate::hooks::{Disposer, EventChannel, HookRegistry, InputHookDecision, ListenerFn};
use crate::provider::StreamProvider;
use crate::tool::AgentTool;
use crate::types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Queue mode for steering and follow-up messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Deliver one message per drain.
    OneAtATime,
    /// Deliver the whole queue per drain.
    All,
}

/// Synchronous precondition failures returned directly from `Agent` entry
/// points. Everything else (provider failures, tool errors, cancellation)
/// surfaces on the event stream instead — see `error_message` on assistant
/// messages and `is_error` on tool results.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent is already streaming")]
    AlreadyStreaming,
    #[error("no messages to continue from")]
    EmptyConversation,
    #[error("Cannot continue from message role: assistant")]
    LastMessageIsAssistant,
}

/// The main agent. Owns conversation state, the tool registry, and the
/// provider; runs the turn loop on `prompt`/`continue_run`.
pub struct Agent {
    pub system_prompt: String,
    pub model: String,
    pub api_key: String,
    pub thinking_level: ThinkingLevel,
    pub thinking_budget: Option<u32>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub cache_config: CacheConfig,
    pub context_config: Option<ContextConfig>,
    pub execution_limits: Option<ExecutionLimits>,
    pub retry_config: crate::retry::RetryConfig,

    messages: Vec<AgentMessage>,
    tools: Arc<Mutex<HashMap<String, Arc<dyn AgentTool>>>>,
    active_tools: Option<Vec<String>>,
    provider: Box<dyn StreamProvider>,
    compaction: Arc<dyn CompactionStrategy>,
    convert_to_llm: Option<Box<ConvertToLlmFn>>,

    steering_queue: Arc<Mutex<VecDeque<AgentMessage>>>,
    follow_up_queue: Arc<Mutex<VecDeque<AgentMessage>>>,
    steering_mode: QueueMode,
    follow_up_mode: QueueMode,

    hooks: Arc<Mutex<HookRegistry>>,
    cancel: Mutex<Option<CancellationToken>>,
    is_streaming: Arc<Mutex<bool>>,
    idle_notify: Arc<tokio::sync::Notify>,
}

impl Agent {
    pub fn new(provider: impl StreamProvider + 'static) -> Self {
        Self {
            system_prompt: String::new(),
            model: String::new(),
            api_key: String::new(),
            thinking_level: ThinkingLevel::Off,
            thinking_budget: None,
            max_tokens: None,
            temperature: None,
            cache_config: CacheConfig::default(),
            context_config: Some(ContextConfig::default()),
            execution_limits: Some(ExecutionLimits::default()),
            retry_config: crate::retry::RetryConfig::default(),
            messages: Vec::new(),
            tools: Arc::new(Mutex::new(HashMap::new())),
            active_tools: None,
            provider: Box::new(provider),
            compaction: Arc::new(DefaultCompaction),
            convert_to_llm: None,
            steering_queue: Arc::new(Mutex::new(VecDeque::new())),
            follow_up_queue: Arc::new(Mutex::new(VecDeque::new())),
            steering_mode: QueueMode::OneAtATime,
            follow_up_mode: QueueMode::OneAtATime,
            hooks: Arc::new(Mutex::new(HookRegistry::new())),
            cancel: Mutex::new(None),
            is_streaming: Arc::new(Mutex::new(false)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    // -- Builder-style setters --

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_thinking(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn AgentTool>>) -> Self {
        let mut map = HashMap::new();
        for tool in tools {
            map.insert(tool.name().to_string(), tool);
        }
        self.tools = Arc::new(Mutex::new(map));
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = Some(config);
        self
    }

    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn with_retry_config(mut self, config: crate::retry::RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_execution_limits(mut self, limits: ExecutionLimits) -> Self {
        self.execution_limits = Some(limits);
        self
    }

    pub fn with_compaction(mut self, strategy: Arc<dyn CompactionStrategy>) -> Self {
        self.compaction = strategy;
        self
    }

    pub fn with_convert_to_llm(mut self, f: Box<ConvertToLlmFn>) -> Self {
        self.convert_to_llm = Some(f);
        self
    }

    pub fn with_messages(mut self, msgs: Vec<AgentMessage>) -> Self {
        self.messages = msgs;
        self
    }

    /// Disable automatic context compaction and execution limits.
    pub fn without_context_management(mut self) -> Self {
        self.context_config = None;
        self.execution_limits = None;
        self
    }

    // -- Lifecycle callback convenience layer, built on `on()` --

    /// Fires at the start of each turn. Implemented as a thin wrapper over
    /// `on("turn_start", ...)`.
    pub fn on_before_turn(&self, f: impl Fn() + Send + Sync + 'static) -> Disposer {
        self.on("turn_start", Arc::new(move |_event: &AgentEvent| f()))
    }

    /// Fires after each turn completes, with the assistant message and tool
    /// results. Implemented as a thin wrapper over `on("turn_end", ...)`.
    pub fn on_after_turn(
        &self,
        f: impl Fn(&AgentMessage, &[Message]) + Send + Sync + 'static,
    ) -> Disposer {
        self.on(
            "turn_end",
            Arc::new(move |event: &AgentEvent| {
                if let AgentEvent::TurnEnd { message, tool_results } = event {
                    f(message, tool_results);
                }
            }),
        )
    }

    /// Fires whenever an assistant message finalizes with a populated error.
    /// Implemented as a thin wrapper over `on("message_end", ...)` that
    /// inspects `errorMessage`.
    pub fn on_error(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Disposer {
        self.on(
            "message_end",
            Arc::new(move |event: &AgentEvent| {
                if let AgentEvent::MessageEnd {
                    message: AgentMessage::Llm(Message::Assistant { error_message: Some(err), .. }),
                } = event
                {
                    f(err);
                }
            }),
        )
    }

    // -- State access --

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        *self.is_streaming.lock().unwrap()
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn append_message(&mut self, msg: AgentMessage) {
        self.messages.push(msg);
    }

    pub fn replace_messages(&mut self, msgs: Vec<AgentMessage>) {
        self.messages = msgs;
    }

    pub fn save_messages(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.messages)
    }

    pub fn restore_messages(&mut self, json: &str) -> Result<(), serde_json::Error> {
        self.messages = serde_json::from_str(json)?;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.clear_all_queues();
        *self.is_streaming.lock().unwrap() = false;
        *self.cancel.lock().unwrap() = None;
    }

    // -- Tool registry --

    pub fn register_tool(&self, tool: Arc<dyn AgentTool>) {
        self.tools.lock().unwrap().insert(tool.name().to_string(), tool);
    }

    pub fn unregister_tool(&self, name: &str) {
        self.tools.lock().unwrap().remove(name);
    }

    pub fn set_tools(&self, tools: Vec<Arc<dyn AgentTool>>) {
        let mut map = HashMap::new();
        for tool in tools {
            map.insert(tool.name().to_string(), tool);
        }
        *self.tools.lock().unwrap() = map;
    }

    /// The name-list filter currently scoping which registered tools are
    /// exposed to the model. `None` means every registered tool is active.
    pub fn get_active_tools(&self) -> Option<Vec<String>> {
        self.active_tools.clone()
    }

    pub fn set_active_tools(&mut self, names: Option<Vec<String>>) {
        self.active_tools = names;
    }

    fn active_tool_map(&self) -> HashMap<String, Arc<dyn AgentTool>> {
        let all = self.tools.lock().unwrap();
        match &self.active_tools {
            None => all.clone(),
            Some(names) => names
                .iter()
                .filter_map(|name| all.get(name).map(|t| (name.clone(), t.clone())))
                .collect(),
        }
    }

    // -- Queue management --

    pub fn steer(&self, msg: AgentMessage) {
        self.steering_queue.lock().unwrap().push_back(msg);
    }

    pub fn follow_up(&self, msg: AgentMessage) {
        self.follow_up_queue.lock().unwrap().push_back(msg);
    }

    pub fn clear_steering_queue(&self) {
        self.steering_queue.lock().unwrap().clear();
    }

    pub fn clear_follow_up_queue(&self) {
        self.follow_up_queue.lock().unwrap().clear();
    }

    pub fn clear_all_queues(&self) {
        self.clear_steering_queue();
        self.clear_follow_up_queue();
    }

    pub fn set_steering_mode(&mut self, mode: QueueMode) {
        self.steering_mode = mode;
    }

    pub fn set_follow_up_mode(&mut self, mode: QueueMode) {
        self.follow_up_mode = mode;
    }

    // -- Config mutators --

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_thinking_level(&mut self, level: ThinkingLevel) {
        self.thinking_level = level;
    }

    /// Overrides the token budget for the current thinking level; `None`
    /// falls back to `ThinkingLevel::default_budget`.
    pub fn thinking_budgets(&mut self, budget: Option<u32>) {
        self.thinking_budget = budget;
    }

    // -- Listeners --

    pub fn subscribe(&self, f: ListenerFn) -> Disposer {
        let hooks = self.hooks.clone();
        let id = hooks.lock().unwrap().add_listener(EventChannel::Event, f);
        Disposer::new(move || {
            hooks.lock().unwrap().remove_listener(id);
        })
    }

    pub fn on(&self, event: impl Into<String>, f: ListenerFn) -> Disposer {
        let hooks = self.hooks.clone();
        let id = hooks
            .lock()
            .unwrap()
            .add_listener(EventChannel::Named(event.into()), f);
        Disposer::new(move || {
            hooks.lock().unwrap().remove_listener(id);
        })
    }

    // -- Extensions --

    /// Runs `factory` against a fresh `ExtensionApi`, returning a disposer
    /// that undoes every hook/listener/tool it registered in one shot, plus
    /// whatever cleanup `factory` itself returns.
    pub fn use_extension(&self, factory: impl FnOnce(&mut ExtensionApi) -> Option<Disposer>) -> Disposer {
        let mut api = ExtensionApi::new(
            self.hooks.clone(),
            self.tools.clone(),
            self.steering_queue.clone(),
            self.follow_up_queue.clone(),
        );
        let own_cleanup = factory(&mut api);
        let registrations = api.into_disposer();
        match own_cleanup {
            Some(cleanup) => Disposer::combine(vec![registrations, cleanup]),
            None => registrations,
        }
    }

    // -- Control --

    pub fn abort(&self) {
        if let Some(cancel) = self.cancel.lock().unwrap().as_ref() {
            cancel.cancel();
        }
    }

    /// Resolves once the current run, if any, finishes.
    pub async fn wait_for_idle(&self) {
        loop {
            if !self.is_streaming() {
                return;
            }
            self.idle_notify.notified().await;
        }
    }

    // -- Prompting --

    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<AgentEventStream, AgentError> {
        let text = text.into();
        let hooks = self.hooks.lock().unwrap().clone();
        let decision = hooks.run_input_hooks(text.clone(), Vec::new()).await;
        let (text, images) = match decision {
            InputHookDecision::Continue => (text, Vec::new()),
            InputHookDecision::Transform { text, images } => (text, images),
            InputHookDecision::Handled => {
                let (_, stream) = event_stream::channel(self.hooks.clone());
                return Ok(stream);
            }
        };
        let mut content = vec![Content::text(text)];
        content.extend(images);
        self.prompt_messages(vec![AgentMessage::Llm(Message::user_parts(content))]).await
    }

    pub async fn prompt_messages(
        &mut self,
        messages: Vec<AgentMessage>,
    ) -> Result<AgentEventStream, AgentError> {
        self.begin_streaming()?;
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());

        let (sink, stream) = event_stream::channel(self.hooks.clone());
        let mut ctx = RunContext {
            system_prompt: self.system_prompt.clone(),
            messages: std::mem::take(&mut self.messages),
            tools: self.active_tool_map(),
        };
        let config = self.build_run_config();

        agent_loop::run_prompt(messages, &mut ctx, &config, &sink, &cancel).await;
        drop(config);
        self.messages = ctx.messages;

        self.end_streaming();
        Ok(stream)
    }

    /// Resumes the turn loop with no new initial messages.
    pub async fn continue_run(&mut self) -> Result<AgentEventStream, AgentError> {
        if self.messages.is_empty() {
            return Err(AgentError::EmptyConversation);
        }
        if matches!(self.messages.last(), Some(AgentMessage::Llm(Message::Assistant { .. }))) {
            return Err(AgentError::LastMessageIsAssistant);
        }
        self.begin_streaming()?;
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());

        let (sink, stream) = event_stream::channel(self.hooks.clone());
        let mut ctx = RunContext {
            system_prompt: self.system_prompt.clone(),
            messages: std::mem::take(&mut self.messages),
            tools: self.active_tool_map(),
        };
        let config = self.build_run_config();

        agent_loop::run_continue(&mut ctx, &config, &sink, &cancel).await;
        drop(config);
        self.messages = ctx.messages;

        self.end_streaming();
        Ok(stream)
    }

    fn begin_streaming(&self) -> Result<(), AgentError> {
        let mut streaming = self.is_streaming.lock().unwrap();
        if *streaming {
            return Err(AgentError::AlreadyStreaming);
        }
        *streaming = true;
        Ok(())
    }

    fn end_streaming(&self) {
        *self.is_streaming.lock().unwrap() = false;
        *self.cancel.lock().unwrap() = None;
        self.idle_notify.notify_waiters();
    }

    fn build_run_config(&self) -> RunConfig<'_> {
        let steering_queue = self.steering_queue.clone();
        let steering_mode = self.steering_mode;
        let follow_up_queue = self.follow_up_queue.clone();
        let follow_up_mode = self.follow_up_mode;

        RunConfig {
            provider: self.provider.as_ref(),
            model: self.model.clone(),
            provider_name: self.provider.name().to_string(),
            api_key: self.api_key.clone(),
            thinking_level: self.thinking_level,
            thinking_budget: self.thinking_budget,
            cache: self.cache_config.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            retry: self.retry_config.clone(),
            convert_to_llm: self.convert_to_llm.as_deref(),
            hooks: self.hooks.clone(),
            get_steering_messages: Box::new(move || drain(&steering_queue, steering_mode)),
            get_follow_up_messages: Box::new(move || drain(&follow_up_queue, follow_up_mode)),
            context_config: self.context_config.clone(),
            compaction: self.compaction.clone(),
            execution_limits: self.execution_limits.clone(),
        }
    }
}

fn drain(queue: &Arc<Mutex<VecDeque<AgentMessage>>>, mode: QueueMode) -> Vec<AgentMessage> {
    let mut guard = queue.lock().unwrap();
    match mode {
        QueueMode::OneAtATime => guard.pop_front().into_iter().collect(),
        QueueMode::All => guard.drain(..).collect(),
    }
}
