//! Event bus port — publish/subscribe for engine events.

use std::future::Future;

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::event::Event;

/// Publishes domain events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), AutoEdgeError>> + Send {
        (**self).publish(event)
    }
}
