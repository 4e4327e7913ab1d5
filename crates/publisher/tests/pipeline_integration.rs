//! End-to-end tests: transaction boundary → publisher → dispatch / log.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dispatch::{
    EventDispatcher, EventHandler, HandlerRegistry, ProcessingMonitor, Subscription,
    SubscriptionManager,
};
use events::{EventEnvelope, EventKind, ProcessingError, TypeHierarchy};
use publisher::{
    CaptureSink, DeadLetterRecord, EventPublisher, EventPublisherExt, InMemoryLog, LogSink,
    TopicNaming, TransactionalPublisher,
};

/// Rejects orders whose payload total is negative.
struct OrderValidator {
    accepted: AtomicUsize,
}

#[async_trait]
impl EventHandler for OrderValidator {
    fn name(&self) -> &str {
        "order-validator"
    }

    fn event_type(&self) -> &str {
        "OrderPlaced"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), ProcessingError> {
        let total = event.payload()["total"].as_i64().unwrap_or(0);
        if total < 0 {
            return Err(ProcessingError::non_retryable(
                format!("negative order total {total}"),
                self.name(),
            ));
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn order_placed(order: &str, total: i64) -> EventEnvelope {
    EventEnvelope::new(EventKind::OrderPlaced, order, serde_json::json!({ "total": total }))
}

fn dispatcher_with(validator: Arc<OrderValidator>, family_hits: &Arc<AtomicUsize>) -> Arc<EventDispatcher> {
    let registry = HandlerRegistry::builder().register(validator).build().unwrap();
    let hits = Arc::clone(family_hits);
    let subscriptions = SubscriptionManager::builder(TypeHierarchy::commerce())
        .subscribe(Subscription::new("order-history", "on_order", "OrderEvent", move |_e| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .build();
    Arc::new(EventDispatcher::new(
        Arc::new(registry),
        Arc::new(subscriptions),
        Arc::new(ProcessingMonitor::default()),
    ))
}

#[tokio::test]
async fn committed_events_are_published_in_order() {
    let capture = Arc::new(CaptureSink::new());
    let publisher = TransactionalPublisher::new(capture.clone());

    let e1 = order_placed("order-1", 10);
    let e2 = EventEnvelope::new(EventKind::OrderPaid, "order-1", serde_json::json!({}));

    let mut tx = publisher.begin();
    tx.add_pending_event(e1.clone());
    tx.add_pending_event(e2.clone());
    assert!(capture.is_empty());

    publisher.after_commit(&mut tx).await;

    assert_eq!(capture.published_events(), vec![e1, e2]);
}

#[tokio::test]
async fn rolled_back_events_never_reach_handlers() {
    let validator = Arc::new(OrderValidator {
        accepted: AtomicUsize::new(0),
    });
    let family_hits = Arc::new(AtomicUsize::new(0));
    let capture = Arc::new(CaptureSink::with_dispatcher(dispatcher_with(
        validator.clone(),
        &family_hits,
    )));
    let publisher = TransactionalPublisher::new(capture.clone());

    let mut tx = publisher.begin();
    tx.add_pending_event(order_placed("order-1", 10));
    publisher.after_rollback(&mut tx);

    assert!(capture.published_events().is_empty());
    assert_eq!(validator.accepted.load(Ordering::SeqCst), 0);
    assert_eq!(family_hits.load(Ordering::SeqCst), 0);
    assert!(publisher.begin().pending_events().is_empty());
}

#[tokio::test]
async fn failing_event_does_not_stop_the_rest_of_the_batch() {
    let validator = Arc::new(OrderValidator {
        accepted: AtomicUsize::new(0),
    });
    let family_hits = Arc::new(AtomicUsize::new(0));
    let dispatcher = dispatcher_with(validator.clone(), &family_hits);
    let capture = CaptureSink::with_dispatcher(dispatcher.clone());

    capture
        .publish_all(vec![
            order_placed("order-1", 10),
            order_placed("order-2", -5),
            order_placed("order-3", 30),
        ])
        .await;

    assert_eq!(capture.len(), 3);
    assert_eq!(validator.accepted.load(Ordering::SeqCst), 2);
    assert_eq!(family_hits.load(Ordering::SeqCst), 3);

    let stats = dispatcher.monitor().get_statistics();
    assert_eq!(stats.total_processed, 6);
    assert_eq!(stats.failure_count, 1);
}

#[tokio::test]
async fn panicking_subscriber_does_not_break_a_committed_batch() {
    let steady_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&steady_hits);
    let subscriptions = SubscriptionManager::builder(TypeHierarchy::commerce())
        .subscribe(Subscription::new("order-history", "on_order", "OrderEvent", move |_e| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .subscribe(Subscription::new("fraud-check", "on_order", "OrderEvent", |event: EventEnvelope| async move {
            if event.aggregate_id().as_str() == "order-2" {
                panic!("fraud model unavailable");
            }
            Ok(())
        }))
        .build();
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::new(HandlerRegistry::empty()),
        Arc::new(subscriptions),
        Arc::new(ProcessingMonitor::default()),
    ));
    let capture = Arc::new(CaptureSink::with_dispatcher(dispatcher.clone()));
    let publisher = TransactionalPublisher::new(capture.clone());

    let mut tx = publisher.begin();
    tx.add_pending_events(vec![
        order_placed("order-1", 10),
        order_placed("order-2", 20),
        order_placed("order-3", 30),
    ]);
    publisher.after_commit(&mut tx).await;

    let published: Vec<String> = capture
        .published_events()
        .iter()
        .map(|e| e.aggregate_id().to_string())
        .collect();
    assert_eq!(published, vec!["order-1", "order-2", "order-3"]);
    assert_eq!(steady_hits.load(Ordering::SeqCst), 3);

    let stats = dispatcher.monitor().get_statistics();
    assert_eq!(stats.active_count, 0);
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.success_count, 5);
}

#[tokio::test]
async fn absent_and_empty_inputs_produce_nothing() {
    let log = Arc::new(InMemoryLog::new(2));
    let sink = LogSink::new(log.clone(), TopicNaming::new("shop"));
    let capture = CaptureSink::new();

    for publisher in [&sink as &dyn EventPublisher, &capture as &dyn EventPublisher] {
        publisher.publish_optional(None).await;
        publisher.publish_optional_batch(None).await;
        publisher.publish_optional_batch(Some(Vec::new())).await;
        publisher.publish_all(Vec::new()).await;
    }
    sink.flush().await;

    assert!(log.topics().is_empty());
    assert!(capture.is_empty());
}

#[tokio::test]
async fn undeliverable_event_is_dead_lettered_once() {
    let log = Arc::new(InMemoryLog::new(3));
    log.fail_topic("shop.orderplaced", "destination unreachable");
    let sink = Arc::new(LogSink::new(log.clone(), TopicNaming::new("shop")));
    let publisher = TransactionalPublisher::new(sink.clone());

    let event = order_placed("order-13", 99);
    let mut tx = publisher.begin();
    tx.add_pending_event(event.clone());
    publisher.after_commit(&mut tx).await;
    sink.flush().await;

    assert_eq!(log.record_count("shop.orderplaced"), 0);
    let dead = log.records("shop.orderplaced.dlq");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key, "order-13");

    let record: DeadLetterRecord = serde_json::from_slice(&dead[0].payload).unwrap();
    assert_eq!(record.event.aggregate_id().as_str(), "order-13");
    assert_eq!(record.event.event_id(), event.event_id());
    assert!(record.cause.message.contains("destination unreachable"));
}

#[tokio::test]
async fn log_sink_dispatches_locally_after_delivery() {
    let validator = Arc::new(OrderValidator {
        accepted: AtomicUsize::new(0),
    });
    let family_hits = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(InMemoryLog::new(3));
    log.fail_topic("shop.orderplaced", "unreachable");
    let sink = LogSink::new(log.clone(), TopicNaming::new("shop"))
        .with_local_dispatch(dispatcher_with(validator.clone(), &family_hits));

    sink.publish(order_placed("order-1", 10)).await;
    sink.publish(EventEnvelope::new(EventKind::OrderShipped, "order-1", serde_json::json!({})))
        .await;
    sink.flush().await;

    // the failed OrderPlaced delivery is not dispatched
    assert_eq!(validator.accepted.load(Ordering::SeqCst), 0);
    assert_eq!(family_hits.load(Ordering::SeqCst), 1);
    assert_eq!(log.record_count("shop.ordershipped"), 1);
}
