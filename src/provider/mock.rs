//! Mock provider for testing. No real API calls.

use super::traits::*;
use crate::types::*;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A mock response: either plain text or tool calls.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    ToolCalls(Vec<MockToolCall>),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct MockToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Mock LLM provider for tests. Supply a sequence of responses; each `stream`
/// call consumes the next one, falling back to a fixed text once exhausted.
pub struct MockProvider {
    responses: std::sync::Mutex<Vec<MockResponse>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }

    /// Convenience: provider that always returns the same text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![MockResponse::Text(text.into())])
    }

    /// Convenience: sequence of text responses.
    pub fn texts(texts: Vec<impl Into<String>>) -> Self {
        Self::new(
            texts
                .into_iter()
                .map(|t| MockResponse::Text(t.into()))
                .collect(),
        )
    }
}

#[async_trait]
impl StreamProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _config: StreamConfig,
        tx: mpsc::UnboundedSender<StreamPart>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<(), ProviderError> {
        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                MockResponse::Text("(no more mock responses)".into())
            } else {
                responses.remove(0)
            }
        };

        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        match response {
            MockResponse::Text(text) => {
                let _ = tx.send(StreamPart::TextStart { index: 0 });
                let _ = tx.send(StreamPart::TextDelta { index: 0, delta: text });
                let _ = tx.send(StreamPart::TextEnd { index: 0 });
                let _ = tx.send(StreamPart::FinishStep {
                    usage: Usage::default(),
                });
                let _ = tx.send(StreamPart::Finish {
                    finish_reason: ProviderFinishReason::Stop,
                    total_usage: Usage::default(),
                });
            }
            MockResponse::ToolCalls(calls) => {
                for (i, call) in calls.into_iter().enumerate() {
                    let id = format!("mock-tool-{i}");
                    let _ = tx.send(StreamPart::ToolCall {
                        index: i,
                        id,
                        name: call.name,
                        input: call.arguments,
                    });
                }
                let _ = tx.send(StreamPart::FinishStep {
                    usage: Usage::default(),
                });
                let _ = tx.send(StreamPart::Finish {
                    finish_reason: ProviderFinishReason::ToolCalls,
                    total_usage: Usage::default(),
                });
            }
            MockResponse::Error(message) => {
                let _ = tx.send(StreamPart::Error { message });
            }
        }

        Ok(())
    }
}
