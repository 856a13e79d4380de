//! In-process event bus backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::event::Event;

use crate::ports::EventPublisher;

/// Fan-out of engine events to the SSE stream and any other in-process
/// listener. A slow subscriber lags and loses the oldest events; publishers
/// never wait.
pub struct InProcessEventBus {
    sender: broadcast::Sender<Event>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), AutoEdgeError>> + Send {
        // zero receivers is not an error
        let _ = self.sender.send(event);
        async { Ok(()) }
    }
}
