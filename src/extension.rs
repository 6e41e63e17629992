//! Extension plumbing (C7): the `use(extension)` mechanism. An extension is a
//! closure run once against an `ExtensionApi`, through which it registers
//! hooks, listeners, and tools the same way application code would through
//! `Agent` directly. Every registration made through the API is tracked, so
//! `Agent::use_extension` can hand back one `Disposer` that undoes all of
//! them — plus whatever cleanup the extension itself returns — without
//! touching registrations anyone else made.

use crate::hooks::{
    AfterToolResultFn, BeforeToolCallFn, Disposer, EventChannel, HookRegistry, InputHookFn,
    ListenerFn, TransformContextFn,
};
use crate::tool::AgentTool;
use crate::types::{AgentMessage, Content, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Where a message delivered via `ExtensionApi::send_user_message` is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverAs {
    Steer,
    FollowUp,
}

/// The operations available to an extension factory. Everything registered
/// through this handle is remembered so it can be undone in one shot.
pub struct ExtensionApi {
    hooks: Arc<Mutex<HookRegistry>>,
    tools: Arc<Mutex<HashMap<String, Arc<dyn AgentTool>>>>,
    steering_queue: Arc<Mutex<VecDeque<AgentMessage>>>,
    follow_up_queue: Arc<Mutex<VecDeque<AgentMessage>>>,
    disposers: Vec<Disposer>,
    registered_tools: Vec<String>,
}

impl ExtensionApi {
    pub(crate) fn new(
        hooks: Arc<Mutex<HookRegistry>>,
        tools: Arc<Mutex<HashMap<String, Arc<dyn AgentTool>>>>,
        steering_queue: Arc<Mutex<VecDeque<AgentMessage>>>,
        follow_up_queue: Arc<Mutex<VecDeque<AgentMessage>>>,
    ) -> Self {
        Self {
            hooks,
            tools,
            steering_queue,
            follow_up_queue,
            disposers: Vec::new(),
            registered_tools: Vec::new(),
        }
    }

    pub fn transform_context(&mut self, f: TransformContextFn) {
        let hooks = self.hooks.clone();
        let id = hooks.lock().unwrap().add_transform_context(f);
        self.disposers.push(Disposer::new(move || {
            hooks.lock().unwrap().remove_transform_context(id);
        }));
    }

    pub fn before_tool_call(&mut self, f: BeforeToolCallFn) {
        let hooks = self.hooks.clone();
        let id = hooks.lock().unwrap().add_before_tool_call(f);
        self.disposers.push(Disposer::new(move || {
            hooks.lock().unwrap().remove_before_tool_call(id);
        }));
    }

    pub fn after_tool_result(&mut self, f: AfterToolResultFn) {
        let hooks = self.hooks.clone();
        let id = hooks.lock().unwrap().add_after_tool_result(f);
        self.disposers.push(Disposer::new(move || {
            hooks.lock().unwrap().remove_after_tool_result(id);
        }));
    }

    pub fn input_hook(&mut self, f: InputHookFn) {
        let hooks = self.hooks.clone();
        let id = hooks.lock().unwrap().add_input_hook(f);
        self.disposers.push(Disposer::new(move || {
            hooks.lock().unwrap().remove_input_hook(id);
        }));
    }

    /// Subscribes to every event (`"event"` channel).
    pub fn subscribe(&mut self, f: ListenerFn) {
        self.on_channel(EventChannel::Event, f);
    }

    /// Subscribes to one named event channel, e.g. `"turn_end"`.
    pub fn on(&mut self, event: impl Into<String>, f: ListenerFn) {
        self.on_channel(EventChannel::Named(event.into()), f);
    }

    fn on_channel(&mut self, channel: EventChannel, f: ListenerFn) {
        let hooks = self.hooks.clone();
        let id = hooks.lock().unwrap().add_listener(channel, f);
        self.disposers.push(Disposer::new(move || {
            hooks.lock().unwrap().remove_listener(id);
        }));
    }

    /// Registers a tool. Removed automatically on disposal if the extension
    /// never unregistered it itself.
    pub fn register_tool(&mut self, tool: Arc<dyn AgentTool>) {
        let name = tool.name().to_string();
        self.tools.lock().unwrap().insert(name.clone(), tool);
        self.registered_tools.push(name);
    }

    pub fn unregister_tool(&mut self, name: &str) {
        self.tools.lock().unwrap().remove(name);
        self.registered_tools.retain(|n| n != name);
    }

    /// Enqueues a user message as steering or follow-up, per `deliver_as`.
    pub fn send_user_message(&self, text: impl Into<String>, deliver_as: DeliverAs) {
        let message = AgentMessage::Llm(Message::user(text));
        let queue = match deliver_as {
            DeliverAs::Steer => &self.steering_queue,
            DeliverAs::FollowUp => &self.follow_up_queue,
        };
        queue.lock().unwrap().push_back(message);
    }

    pub fn send_user_parts(&self, parts: Vec<Content>, deliver_as: DeliverAs) {
        let message = AgentMessage::Llm(Message::user_parts(parts));
        let queue = match deliver_as {
            DeliverAs::Steer => &self.steering_queue,
            DeliverAs::FollowUp => &self.follow_up_queue,
        };
        queue.lock().unwrap().push_back(message);
    }

    /// Folds every hook/listener disposer recorded during setup, plus the
    /// tools this extension registered and never removed itself, into one
    /// `Disposer`. Called by `Agent::use_extension` after the factory runs.
    pub(crate) fn into_disposer(self) -> Disposer {
        let tools = self.tools;
        let leftover_tools = self.registered_tools;
        let mut all = self.disposers;
        all.push(Disposer::new(move || {
            let mut guard = tools.lock().unwrap();
            for name in leftover_tools {
                guard.remove(&name);
            }
        }));
        Disposer::combine(all)
    }
}
