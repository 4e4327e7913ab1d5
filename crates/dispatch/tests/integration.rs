//! Integration tests: registry + subscriptions + monitor under concurrent dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dispatch::{
    EventDispatcher, EventHandler, HandlerRegistry, HealthStatus, MonitorConfig,
    ProcessingMonitor, Subscription, SubscriptionManager,
};
use events::{EventEnvelope, EventKind, ProcessingError, TypeHierarchy};

/// Fails on every event whose payload carries `"fail": true`.
struct PayloadDrivenHandler {
    seen: AtomicUsize,
}

#[async_trait]
impl EventHandler for PayloadDrivenHandler {
    fn name(&self) -> &str {
        "payment-ledger"
    }

    fn event_type(&self) -> &str {
        "OrderPaid"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), ProcessingError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if event.payload()["fail"] == serde_json::json!(true) {
            return Err(ProcessingError::non_retryable("ledger rejected entry", self.name()));
        }
        Ok(())
    }
}

fn paid(order: usize, fail: bool) -> EventEnvelope {
    EventEnvelope::new(
        EventKind::OrderPaid,
        format!("order-{order}"),
        serde_json::json!({ "fail": fail }),
    )
}

fn setup() -> (Arc<EventDispatcher>, Arc<PayloadDrivenHandler>, Arc<AtomicUsize>) {
    let handler = Arc::new(PayloadDrivenHandler {
        seen: AtomicUsize::new(0),
    });
    let family_hits = Arc::new(AtomicUsize::new(0));

    let registry = HandlerRegistry::builder()
        .register(handler.clone())
        .build()
        .unwrap();

    let hits = Arc::clone(&family_hits);
    let subscriptions = SubscriptionManager::builder(TypeHierarchy::commerce())
        .subscribe(Subscription::new(
            "order-timeline",
            "on_order_event",
            "OrderEvent",
            move |_event| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ))
        .build();

    let monitor = Arc::new(ProcessingMonitor::new(MonitorConfig::default()));
    let dispatcher = EventDispatcher::new(Arc::new(registry), Arc::new(subscriptions), monitor);
    (Arc::new(dispatcher), handler, family_hits)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn statistics_stay_consistent_under_concurrent_dispatch() {
    let (dispatcher, handler, family_hits) = setup();

    let mut tasks = Vec::new();
    for i in 0..40 {
        let dispatcher = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move {
            dispatcher.dispatch(&paid(i, i % 4 == 0)).await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(handler.seen.load(Ordering::SeqCst), 40);
    assert_eq!(family_hits.load(Ordering::SeqCst), 40);

    let stats = dispatcher.monitor().get_statistics();
    // 40 handler invocations + 40 subscriber invocations
    assert_eq!(stats.total_processed, 80);
    assert_eq!(stats.failure_count, 10);
    assert_eq!(stats.success_count, 70);
    assert_eq!(stats.success_rate, 70.0 / 80.0);
    assert_eq!(stats.active_count, 0);

    let paid_stats = &stats.by_event_type["OrderPaid"];
    assert_eq!(paid_stats.total_count, 80);
    assert_eq!(paid_stats.failure_count, 10);
    assert!(paid_stats.min_processing_time_ms <= paid_stats.max_processing_time_ms);
}

#[tokio::test]
async fn supertype_subscriber_matches_and_unrelated_does_not() {
    let received = Arc::new(AtomicUsize::new(0));
    let unrelated = Arc::new(AtomicUsize::new(0));

    let (r, u) = (Arc::clone(&received), Arc::clone(&unrelated));
    let subscriptions = SubscriptionManager::builder(TypeHierarchy::commerce())
        .subscribe(Subscription::new("promo-audit", "on_promotion", "PromotionEvent", move |_e| {
            let r = Arc::clone(&r);
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .subscribe(Subscription::new("customer-crm", "on_customer", "CustomerEvent", move |_e| {
            let u = Arc::clone(&u);
            async move {
                u.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .build();

    let dispatcher = EventDispatcher::new(
        Arc::new(HandlerRegistry::empty()),
        Arc::new(subscriptions),
        Arc::new(ProcessingMonitor::default()),
    );

    let event = EventEnvelope::new(EventKind::PromotionApplied, "promo-5", serde_json::json!({}));
    let report = dispatcher.dispatch(&event).await;

    assert_eq!(report.delivered(), 1);
    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(unrelated.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repeated_failures_mark_handler_unhealthy() {
    let (dispatcher, _handler, _) = setup();

    for i in 0..5 {
        dispatcher.dispatch(&paid(i, true)).await;
    }

    let health = dispatcher.monitor().get_all_health();
    assert_eq!(health["payment-ledger"].status, HealthStatus::Unhealthy);
    assert_eq!(health["payment-ledger"].consecutive_failures, 5);
    assert_eq!(health["order-timeline::on_order_event"].status, HealthStatus::Healthy);
}
