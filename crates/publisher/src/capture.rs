//! In-memory capture sink.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dispatch::EventDispatcher;
use events::EventEnvelope;

use crate::publisher::EventPublisher;

/// Records every published event in an ordered in-memory log and forwards
/// it to the local dispatcher before `publish` returns.
///
/// The log is shared by every publish and supports concurrent appends.
#[derive(Default)]
pub struct CaptureSink {
    log: RwLock<Vec<EventEnvelope>>,
    dispatcher: Option<Arc<EventDispatcher>>,
}

impl CaptureSink {
    /// Creates a capture sink that only records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a capture sink that also dispatches to local handlers.
    pub fn with_dispatcher(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            log: RwLock::default(),
            dispatcher: Some(dispatcher),
        }
    }

    /// Copy of every event published so far, in publish order.
    pub fn published_events(&self) -> Vec<EventEnvelope> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Published events with the given type tag, in publish order.
    pub fn published_events_by_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Empties the log.
    pub fn clear_published_events(&self) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink")
            .field("captured", &self.len())
            .field("dispatching", &self.dispatcher.is_some())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type(), event_id = %event.event_id()))]
    async fn publish(&self, event: EventEnvelope) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        metrics::counter!("events_published_total", "sink" => "capture").increment(1);
        tracing::debug!(aggregate_id = %event.aggregate_id(), "event captured");

        if let Some(dispatcher) = &self.dispatcher {
            let report = dispatcher.dispatch(&event).await;
            if !report.is_success() {
                tracing::warn!(
                    failed = report.failed(),
                    delivered = report.delivered(),
                    "local dispatch had failing handlers"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::EventPublisherExt;
    use events::EventKind;

    fn event(kind: EventKind, aggregate: &str) -> EventEnvelope {
        EventEnvelope::new(kind, aggregate, serde_json::json!({}))
    }

    #[tokio::test]
    async fn captures_in_publish_order() {
        let sink = CaptureSink::new();
        let first = event(EventKind::OrderPlaced, "order-1");
        let second = event(EventKind::OrderPaid, "order-1");

        sink.publish_all(vec![first.clone(), second.clone()]).await;

        assert_eq!(sink.published_events(), vec![first, second]);
    }

    #[tokio::test]
    async fn filters_by_type() {
        let sink = CaptureSink::new();
        sink.publish(event(EventKind::CartItemAdded, "cart-1")).await;
        sink.publish(event(EventKind::CartItemRemoved, "cart-1")).await;
        sink.publish(event(EventKind::CartItemAdded, "cart-2")).await;

        let added = sink.published_events_by_type("CartItemAdded");
        assert_eq!(added.len(), 2);
        assert!(sink.published_events_by_type("OrderPlaced").is_empty());
    }

    #[tokio::test]
    async fn clear_resets_the_log() {
        let sink = CaptureSink::new();
        sink.publish(event(EventKind::PromotionActivated, "promo-1")).await;
        assert_eq!(sink.len(), 1);

        sink.clear_published_events();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn absent_inputs_are_ignored() {
        let sink = CaptureSink::new();
        sink.publish_optional(None).await;
        sink.publish_optional_batch(None).await;
        sink.publish_optional_batch(Some(Vec::new())).await;
        sink.publish_all(Vec::new()).await;
        assert!(sink.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishes_are_all_captured() {
        let sink = Arc::new(CaptureSink::new());
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    sink.publish(event(EventKind::OrderPlaced, &format!("order-{i}")))
                        .await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(sink.len(), 50);
    }
}
