//! Publisher abstraction shared by the capture and log sinks.

use async_trait::async_trait;
use events::EventEnvelope;

/// Hands committed events to a sink.
///
/// Publishing is fire-and-continue: implementations handle their own
/// failures (logging, dead-lettering) so one bad event never aborts the
/// rest of a batch and never reaches the committing caller.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &str;

    /// Publishes one event.
    async fn publish(&self, event: EventEnvelope);

    /// Publishes events in order. An empty batch is a no-op.
    async fn publish_all(&self, events: Vec<EventEnvelope>) {
        for event in events {
            self.publish(event).await;
        }
    }
}

/// Convenience methods for inputs that may be absent.
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    /// Publishes the event if there is one.
    async fn publish_optional(&self, event: Option<EventEnvelope>) {
        match event {
            Some(event) => self.publish(event).await,
            None => tracing::trace!(publisher = self.name(), "ignoring absent event"),
        }
    }

    /// Publishes the batch if there is one and it is not empty.
    async fn publish_optional_batch(&self, events: Option<Vec<EventEnvelope>>) {
        match events {
            Some(events) if !events.is_empty() => self.publish_all(events).await,
            _ => tracing::trace!(publisher = self.name(), "ignoring absent or empty batch"),
        }
    }
}

impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}
