//! Save and restore agent conversation state, plus the session-store
//! adapter.
//!
//! Demonstrates:
//! - Running a conversation with `MockProvider`
//! - Saving messages to JSON and restoring into a fresh agent
//! - Subscribing an `InMemorySessionStore` to append one entry per message
//!
//!   cargo run --example persistence

use futures::StreamExt;
use std::sync::Arc;
use turnloop::provider::mock::MockProvider;
use turnloop::session::{self, InMemorySessionStore, SessionStore};
use turnloop::{Agent, AgentEvent, AssistantMessageEvent};

#[tokio::main]
async fn main() {
    // --- Phase 1: initial conversation, persisted as it happens ---
    let provider = MockProvider::text("The capital of France is Paris.");
    let mut agent = Agent::new(provider)
        .with_system_prompt("You are a helpful assistant.")
        .with_model("mock")
        .with_api_key("test");

    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let _disposer = session::persist_to(&agent, store.clone());

    println!("=== Phase 1: Initial conversation ===");
    let mut stream = agent
        .prompt("What is the capital of France?")
        .await
        .expect("agent is idle");
    while let Some(event) = stream.next().await {
        if let AgentEvent::MessageUpdate {
            assistant_message_event: AssistantMessageEvent::TextDelta { delta, .. },
            ..
        } = event
        {
            print!("{delta}");
        }
    }
    println!("\n");

    let json = agent.save_messages().expect("failed to save");
    println!("Saved {} messages ({} bytes)\n", agent.messages().len(), json.len());

    agent.wait_for_idle().await;
    let tree = store.load().await.expect("failed to load session");
    println!("Session store recorded {} entries\n", tree.entries.len());

    // --- Phase 2: restore into a fresh agent and continue ---
    let provider2 = MockProvider::text("Paris is also known as the City of Light.");
    let mut agent2 = Agent::new(provider2)
        .with_system_prompt("You are a helpful assistant.")
        .with_model("mock")
        .with_api_key("test");

    agent2.restore_messages(&json).expect("failed to restore");
    println!(
        "=== Phase 2: restored {} messages, continuing... ===",
        agent2.messages().len()
    );

    let mut stream = agent2.prompt("Tell me more about it.").await.expect("agent is idle");
    while let Some(event) = stream.next().await {
        if let AgentEvent::MessageUpdate {
            assistant_message_event: AssistantMessageEvent::TextDelta { delta, .. },
            ..
        } = event
        {
            print!("{delta}");
        }
    }
    println!("\n");

    println!("Final message count: {}", agent2.messages().len());
}
