//! Agent runtime: a turn loop that drives a streaming LLM conversation,
//! executes local tools the model requests, and streams progress events to
//! observers. See `agent::Agent` for the entry point.

pub mod adapter;
pub mod agent;
pub mod agent_loop;
pub mod context;
pub mod event_stream;
pub mod events;
pub mod executor;
pub mod extension;
pub mod hooks;
pub mod provider;
pub mod retry;
pub mod session;
pub mod tool;
pub mod tools;
pub mod types;

pub use agent::{Agent, AgentError, QueueMode};
pub use agent_loop::{ConvertToLlmFn, RunConfig, RunContext};
pub use context::{CompactionStrategy, ContextConfig, DefaultCompaction, ExecutionLimits};
pub use event_stream::AgentEventStream;
pub use events::{AgentEvent, AssistantMessageEvent};
pub use extension::{DeliverAs, ExtensionApi};
pub use hooks::{Disposer, HookRegistry};
pub use provider::{ProviderError, StreamProvider};
pub use retry::RetryConfig;
pub use session::{InMemorySessionStore, SessionEntry, SessionError, SessionStore, SessionTree};
pub use tool::{AgentTool, ToolError, ToolResult, ToolUpdateFn};
pub use types::*;
