//! The event stream contract (C1): a single-producer, multi-consumer lazy
//! sequence of `AgentEvent`s with a terminal sentinel carrying the run's new
//! messages.
//!
//! The producer side, `EventSink`, wraps an `UnboundedSender<AgentEvent>`
//! alongside the hook registry (C7) so every event fans out to registered
//! listeners synchronously, in registration order, before it reaches the
//! external channel. The consumer side, `AgentEventStream`, wraps the matching
//! receiver and implements `futures::Stream`, so callers can use `StreamExt`
//! combinators or a plain `while let Some(event) = stream.next().await` loop.

use crate::events::AgentEvent;
use crate::hooks::HookRegistry;
use crate::types::AgentMessage;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Producer handle. Cloning shares the same underlying channel and hook
/// registry, so the turn loop, the model-stream adapter, and the tool
/// executor can each hold one during a run.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
    hooks: Arc<Mutex<HookRegistry>>,
    result: Arc<Mutex<Option<Vec<AgentMessage>>>>,
}

impl EventSink {
    /// Dispatches `event` to every matching listener, then forwards it to the
    /// external channel. If the consumer has already dropped its receiver,
    /// the send is silently ignored — the run still completes.
    pub fn emit(&self, event: AgentEvent) {
        self.hooks.lock().unwrap().dispatch(&event);
        if let AgentEvent::AgentEnd { messages } = &event {
            *self.result.lock().unwrap() = Some(messages.clone());
        }
        let _ = self.tx.send(event);
    }
}

/// Consumer handle for one run. Implements `Stream<Item = AgentEvent>`;
/// `result()` returns the terminal `agent_end` payload once it has arrived.
pub struct AgentEventStream {
    rx: UnboundedReceiverStream<AgentEvent>,
    result: Arc<Mutex<Option<Vec<AgentMessage>>>>,
}

impl AgentEventStream {
    /// The `agent_end.messages` payload, once the stream has delivered that
    /// event. `None` before the run finishes.
    pub fn result(&self) -> Option<Vec<AgentMessage>> {
        self.result.lock().unwrap().clone()
    }
}

impl Stream for AgentEventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

/// Creates a connected `EventSink` / `AgentEventStream` pair for one run,
/// sharing `hooks` so listeners registered on the façade see this run's
/// events.
pub fn channel(hooks: Arc<Mutex<HookRegistry>>) -> (EventSink, AgentEventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let result = Arc::new(Mutex::new(None));
    let sink = EventSink {
        tx,
        hooks,
        result: result.clone(),
    };
    let stream = AgentEventStream {
        rx: UnboundedReceiverStream::new(rx),
        result,
    };
    (sink, stream)
}
