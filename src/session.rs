//! Session persistence (§6): a storage boundary, not part of the turn loop.
//! `SessionStore` is consulted by nothing in `agent_loop`/`agent` directly —
//! applications wire it up by subscribing an adapter to `message_end` and
//! appending one entry per finalized message.

use crate::events::AgentEvent;
use crate::hooks::{Disposer, ListenerFn};
use crate::types::AgentMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One node in a session's message history. `parent_id` chains to the entry
/// produced immediately before it, `None` only for the first entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    pub message: AgentMessage,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
}

/// The full history a `SessionStore` hands back from `load`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTree {
    pub entries: Vec<SessionEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session corrupted: {0}")]
    Corrupted(String),
}

/// Storage boundary for a conversation's message history. `load` and `append`
/// are the entire surface; replay and compaction stay in `agent`/`context`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<SessionTree, SessionError>;
    async fn append(&self, entry: SessionEntry) -> Result<(), SessionError>;
}

/// Reference `SessionStore` backing the crate's own tests. Applications that
/// need durability implement the trait against a file or database; a
/// JSONL-backed store is a natural next implementation but isn't shipped here.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: Mutex<Vec<SessionEntry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self) -> Result<SessionTree, SessionError> {
        Ok(SessionTree { entries: self.entries.lock().unwrap().clone() })
    }

    async fn append(&self, entry: SessionEntry) -> Result<(), SessionError> {
        let mut guard = self.entries.lock().unwrap();
        if guard.iter().any(|e| e.id == entry.id) {
            return Err(SessionError::Corrupted(format!("duplicate entry id: {}", entry.id)));
        }
        guard.push(entry);
        Ok(())
    }
}

/// Subscribes `store` to `agent`'s `message_end` event, appending one entry
/// per finalized message with `parent_id` chained to the previous append.
/// Returns the `Disposer` for the underlying listener.
pub fn persist_to(agent: &crate::agent::Agent, store: Arc<dyn SessionStore>) -> Disposer {
    let last_id: Mutex<Option<String>> = Mutex::new(None);
    let store_for_listener = store.clone();

    let listener: ListenerFn = Arc::new(move |event: &AgentEvent| {
        let AgentEvent::MessageEnd { message } = event else { return };

        let mut last_guard = last_id.lock().unwrap();
        let entry = SessionEntry {
            id: Uuid::new_v4().to_string(),
            parent_id: last_guard.clone(),
            message: message.clone(),
            created_at: message.timestamp(),
        };
        *last_guard = Some(entry.id.clone());
        drop(last_guard);

        let store = store_for_listener.clone();
        tokio::spawn(async move {
            if let Err(err) = store.append(entry).await {
                tracing::error!(%err, "session store append failed");
            }
        });
    });

    agent.on("message_end", listener)
}
