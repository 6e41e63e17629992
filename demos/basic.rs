//! Basic example: simple text prompt with Anthropic.
//!
//! Run with: ANTHROPIC_API_KEY=sk-... cargo run --example basic

use futures::StreamExt;
use turnloop::provider::AnthropicProvider;
use turnloop::{Agent, AgentEvent, AssistantMessageEvent};

#[tokio::main]
async fn main() {
    let api_key = std::env::var("ANTHROPIC_API_KEY").expect("Set ANTHROPIC_API_KEY");

    let mut agent = Agent::new(AnthropicProvider)
        .with_system_prompt("You are a helpful assistant. Be concise.")
        .with_model("claude-sonnet-4-20250514")
        .with_api_key(api_key);

    println!("Sending prompt...");

    let mut stream = agent
        .prompt("What is Rust's ownership model in 2 sentences?")
        .await
        .expect("agent is idle");

    while let Some(event) = stream.next().await {
        match event {
            AgentEvent::MessageUpdate {
                assistant_message_event: AssistantMessageEvent::TextDelta { delta, .. },
                ..
            } => {
                print!("{delta}");
            }
            AgentEvent::AgentEnd { .. } => {
                println!("\n\n--- Done ---");
            }
            _ => {}
        }
    }
}
