//! Hook chains the turn loop and tool executor consult at fixed points, plus the
//! typed-listener registry backing `Agent::on` / `Agent::subscribe`.
//!
//! Every hook and listener is stored with a stable id so `Agent::use_extension`
//! can remove exactly the registrations one extension added, in bulk, on
//! disposal — without disturbing anyone else's.

use crate::events::AgentEvent;
use crate::types::{AgentMessage, Message};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type TransformContextFn = Arc<
    dyn Fn(Vec<AgentMessage>, CancellationToken) -> futures::future::BoxFuture<'static, Vec<AgentMessage>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub enum BeforeToolCallDecision {
    Continue(Option<PendingToolCall>),
    Block(Message),
}

pub type BeforeToolCallFn = Arc<
    dyn Fn(PendingToolCall) -> futures::future::BoxFuture<'static, BeforeToolCallDecision>
        + Send
        + Sync,
>;

pub type AfterToolResultFn =
    Arc<dyn Fn(PendingToolCall, Message) -> futures::future::BoxFuture<'static, Message> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum InputHookDecision {
    Continue,
    Transform {
        text: String,
        images: Vec<crate::types::Content>,
    },
    Handled,
}

pub type InputHookFn = Arc<
    dyn Fn(String, Vec<crate::types::Content>) -> futures::future::BoxFuture<'static, InputHookDecision>
        + Send
        + Sync,
>;

pub type ListenerFn = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Which named channel a listener subscribed to. `Event` receives every event;
/// `Named` receives only events whose `AgentEvent::name()` matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventChannel {
    Event,
    Named(String),
}

#[derive(Clone)]
struct Listener {
    channel: EventChannel,
    f: ListenerFn,
}

/// A handle returned by every registration method; dropping it does nothing,
/// calling `dispose()` removes the registration. `Agent::use_extension`
/// collects one per hook/listener an extension adds and folds them into a
/// single disposer.
pub struct Disposer {
    f: Box<dyn FnOnce() + Send>,
}

impl Disposer {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }

    /// Combine several disposers into one that runs all of them, in order.
    pub fn combine(disposers: Vec<Disposer>) -> Self {
        Self::new(move || {
            for d in disposers {
                d.dispose();
            }
        })
    }

    pub fn dispose(self) {
        (self.f)()
    }
}

/// The hook/listener registry. Owned by `Agent` (C6); consulted by the turn loop
/// (C5), the model-stream adapter (C3), and the tool executor (C4).
///
/// Every stored hook/listener is an `Arc`, so cloning the registry is cheap and
/// lets a caller snapshot it out from behind a lock before awaiting anything —
/// a `std::sync::MutexGuard` must never be held across an `.await`.
#[derive(Default, Clone)]
pub struct HookRegistry {
    transform_context: Vec<(u64, TransformContextFn)>,
    before_tool_call: Vec<(u64, BeforeToolCallFn)>,
    after_tool_result: Vec<(u64, AfterToolResultFn)>,
    input_hooks: Vec<(u64, InputHookFn)>,
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_transform_context(&mut self, f: TransformContextFn) -> u64 {
        let id = self.alloc_id();
        self.transform_context.push((id, f));
        id
    }

    pub fn remove_transform_context(&mut self, id: u64) {
        self.transform_context.retain(|(i, _)| *i != id);
    }

    pub fn add_before_tool_call(&mut self, f: BeforeToolCallFn) -> u64 {
        let id = self.alloc_id();
        self.before_tool_call.push((id, f));
        id
    }

    pub fn remove_before_tool_call(&mut self, id: u64) {
        self.before_tool_call.retain(|(i, _)| *i != id);
    }

    pub fn add_after_tool_result(&mut self, f: AfterToolResultFn) -> u64 {
        let id = self.alloc_id();
        self.after_tool_result.push((id, f));
        id
    }

    pub fn remove_after_tool_result(&mut self, id: u64) {
        self.after_tool_result.retain(|(i, _)| *i != id);
    }

    pub fn add_input_hook(&mut self, f: InputHookFn) -> u64 {
        let id = self.alloc_id();
        self.input_hooks.push((id, f));
        id
    }

    pub fn remove_input_hook(&mut self, id: u64) {
        self.input_hooks.retain(|(i, _)| *i != id);
    }

    pub fn add_listener(&mut self, channel: EventChannel, f: ListenerFn) -> u64 {
        let id = self.alloc_id();
        self.listeners.push((id, Listener { channel, f }));
        id
    }

    pub fn remove_listener(&mut self, id: u64) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Runs `transformContext` stages in registration order, each fed the
    /// previous stage's output.
    pub async fn run_transform_context(
        &self,
        mut messages: Vec<AgentMessage>,
        cancel: &CancellationToken,
    ) -> Vec<AgentMessage> {
        for (_, stage) in &self.transform_context {
            messages = stage(messages, cancel.clone()).await;
        }
        messages
    }

    /// Runs `beforeToolCall` stages; the first `Block` wins. `continue` results
    /// may carry a rewritten call that subsequent stages see instead of the
    /// original.
    pub async fn run_before_tool_call(&self, mut call: PendingToolCall) -> BeforeToolCallDecision {
        for (_, stage) in &self.before_tool_call {
            match stage(call.clone()).await {
                BeforeToolCallDecision::Block(msg) => return BeforeToolCallDecision::Block(msg),
                BeforeToolCallDecision::Continue(Some(rewritten)) => call = rewritten,
                BeforeToolCallDecision::Continue(None) => {}
            }
        }
        BeforeToolCallDecision::Continue(Some(call))
    }

    /// Runs `afterToolResult` stages, each transforming the previous stage's
    /// result message.
    pub async fn run_after_tool_result(&self, call: &PendingToolCall, mut result: Message) -> Message {
        for (_, stage) in &self.after_tool_result {
            result = stage(call.clone(), result).await;
        }
        result
    }

    /// Runs input hooks in order. A `Handled` result short-circuits the
    /// remaining hooks; a `Transform` result feeds its text/images into the
    /// next hook and the chain continues. A panicking hook is caught and
    /// logged; its result is treated as `Continue` so later hooks still run.
    pub async fn run_input_hooks(
        &self,
        mut text: String,
        mut images: Vec<crate::types::Content>,
    ) -> InputHookDecision {
        use futures::FutureExt;
        for (_, stage) in &self.input_hooks {
            let fut = AssertUnwindSafe(stage(text.clone(), images.clone())).catch_unwind();
            let decision = match fut.await {
                Ok(decision) => decision,
                Err(_) => {
                    tracing::error!("input hook panicked; treating as continue");
                    InputHookDecision::Continue
                }
            };
            match decision {
                InputHookDecision::Continue => {}
                InputHookDecision::Transform {
                    text: new_text,
                    images: new_images,
                } => {
                    text = new_text;
                    images = new_images;
                }
                InputHookDecision::Handled => return InputHookDecision::Handled,
            }
        }
        InputHookDecision::Transform { text, images }
    }

    /// Fans `event` out to every matching listener, synchronously, in
    /// registration order. A listener that panics is caught and logged so one
    /// bad subscriber never interrupts the others or the producer. The
    /// listener set is snapshotted before iterating, so a listener disposing
    /// itself mid-dispatch cannot invalidate the loop.
    pub fn dispatch(&self, event: &AgentEvent) {
        let name = event.name();
        let snapshot: Vec<ListenerFn> = self
            .listeners
            .iter()
            .filter(|(_, listener)| match &listener.channel {
                EventChannel::Event => true,
                EventChannel::Named(n) => n == name,
            })
            .map(|(_, listener)| listener.f.clone())
            .collect();
        for f in snapshot {
            if std::panic::catch_unwind(AssertUnwindSafe(|| f(event))).is_err() {
                tracing::error!(event = name, "event listener panicked");
            }
        }
    }
}
