//! Explicitly registered subscriber callbacks with supertype fan-out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use events::{EventEnvelope, ProcessingError, TypeHierarchy};
use futures::future::{BoxFuture, join_all};

use crate::dispatcher::contain_panic;

type Callback =
    Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<(), ProcessingError>> + Send + Sync>;

/// One `(owner, method)` callback listening on an event type.
///
/// A subscription declares the tag it listens on and, optionally, the tag
/// its callback is written against. The callback tag must be the declared
/// tag or one of its supertypes, otherwise the subscription is skipped at
/// build time.
#[derive(Clone)]
pub struct Subscription {
    owner: String,
    method: String,
    event_type: String,
    accepts: String,
    callback: Callback,
}

impl Subscription {
    pub fn new<F, Fut>(
        owner: impl Into<String>,
        method: impl Into<String>,
        event_type: impl Into<String>,
        callback: F,
    ) -> Self
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
    {
        let event_type = event_type.into();
        Self {
            owner: owner.into(),
            method: method.into(),
            accepts: event_type.clone(),
            event_type,
            callback: Arc::new(
                move |event| -> BoxFuture<'static, Result<(), ProcessingError>> {
                    Box::pin(callback(event))
                },
            ),
        }
    }

    /// Declares the tag the callback is written against.
    pub fn accepting(mut self, event_type: impl Into<String>) -> Self {
        self.accepts = event_type.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// `owner::method`, used as the handler name in monitoring.
    pub fn name(&self) -> String {
        format!("{}::{}", self.owner, self.method)
    }

    /// Invokes the callback with its own copy of the event.
    pub fn invoke(&self, event: &EventEnvelope) -> BoxFuture<'static, Result<(), ProcessingError>> {
        (self.callback)(event.clone())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("owner", &self.owner)
            .field("method", &self.method)
            .field("event_type", &self.event_type)
            .field("accepts", &self.accepts)
            .finish()
    }
}

/// Collects subscriptions before the manager is frozen.
pub struct SubscriptionManagerBuilder {
    hierarchy: TypeHierarchy,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionManagerBuilder {
    pub fn subscribe(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Validates every subscription and freezes the manager.
    ///
    /// Subscriptions whose callback tag is not assignable from their
    /// declared tag are logged and skipped.
    pub fn build(self) -> SubscriptionManager {
        let mut by_type: HashMap<String, Vec<Subscription>> = HashMap::new();

        for subscription in self.subscriptions {
            if !self
                .hierarchy
                .is_assignable(&subscription.accepts, &subscription.event_type)
            {
                tracing::warn!(
                    subscriber = %subscription.name(),
                    event_type = %subscription.event_type,
                    accepts = %subscription.accepts,
                    "subscriber callback cannot accept its declared event type, skipping"
                );
                continue;
            }
            by_type
                .entry(subscription.event_type.clone())
                .or_default()
                .push(subscription);
        }

        let count: usize = by_type.values().map(Vec::len).sum();
        tracing::info!(subscriptions = count, "subscription manager built");

        SubscriptionManager {
            hierarchy: Arc::new(self.hierarchy),
            by_type,
        }
    }
}

/// Read-only map from declared event type to its subscribers.
pub struct SubscriptionManager {
    hierarchy: Arc<TypeHierarchy>,
    by_type: HashMap<String, Vec<Subscription>>,
}

impl SubscriptionManager {
    pub fn builder(hierarchy: TypeHierarchy) -> SubscriptionManagerBuilder {
        SubscriptionManagerBuilder {
            hierarchy,
            subscriptions: Vec::new(),
        }
    }

    /// A manager with no subscriptions over the commerce hierarchy.
    pub fn empty() -> Self {
        Self::builder(TypeHierarchy::commerce()).build()
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    /// Subscriptions whose declared type is the event's type or a supertype of it.
    pub fn matching(&self, event: &EventEnvelope) -> Vec<&Subscription> {
        self.by_type
            .iter()
            .filter(|(declared, _)| self.hierarchy.is_assignable(declared, event.event_type()))
            .flat_map(|(_, subscriptions)| subscriptions.iter())
            .collect()
    }

    /// Delivers an event to every matching subscriber concurrently.
    ///
    /// A failing or panicking subscriber is logged and does not affect its
    /// siblings.
    /// Returns `(subscriber, result)` pairs in no particular order.
    pub async fn deliver(&self, event: &EventEnvelope) -> Vec<(String, Result<(), ProcessingError>)> {
        let calls = self.matching(event).into_iter().map(|subscription| async move {
            let name = subscription.name();
            let result = contain_panic(&name, async { subscription.invoke(event).await }).await;
            if let Err(err) = &result {
                tracing::error!(
                    subscriber = %subscription.name(),
                    event_type = event.event_type(),
                    event_id = %event.event_id(),
                    error = %err,
                    "subscriber failed"
                );
            }
            (name, result)
        });
        join_all(calls).await
    }

    pub fn subscription_count(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        owner: &str,
        event_type: EventKind,
        counter: &Arc<AtomicUsize>,
    ) -> Subscription {
        let counter = Arc::clone(counter);
        Subscription::new(owner, "on_event", event_type.event_type(), move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn supertype_subscriber_receives_subtype_events() {
        let base = Arc::new(AtomicUsize::new(0));
        let unrelated = Arc::new(AtomicUsize::new(0));

        let manager = SubscriptionManager::builder(TypeHierarchy::commerce())
            .subscribe(counting("audit", EventKind::OrderEvent, &base))
            .subscribe(counting("cart-metrics", EventKind::CartEvent, &unrelated))
            .build();

        let event = EventEnvelope::new(EventKind::OrderShipped, "order-1", serde_json::json!({}));
        let results = manager.deliver(&event).await;

        assert_eq!(results.len(), 1);
        assert_eq!(base.load(Ordering::SeqCst), 1);
        assert_eq!(unrelated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn root_subscriber_sees_everything() {
        let all = Arc::new(AtomicUsize::new(0));
        let manager = SubscriptionManager::builder(TypeHierarchy::commerce())
            .subscribe(counting("analytics", EventKind::DomainEvent, &all))
            .build();

        for kind in [EventKind::CartItemAdded, EventKind::PromotionApplied] {
            manager
                .deliver(&EventEnvelope::new(kind, "x", serde_json::json!({})))
                .await;
        }
        manager
            .deliver(&EventEnvelope::of_type("InventoryAdjusted", "sku-1", serde_json::json!({})))
            .await;

        assert_eq!(all.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_siblings() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let failing = Subscription::new("broken", "on_order", "OrderPlaced", |_event| async {
            Err(ProcessingError::new("boom", "broken::on_order"))
        });

        let manager = SubscriptionManager::builder(TypeHierarchy::commerce())
            .subscribe(failing)
            .subscribe(counting("healthy", EventKind::OrderPlaced, &delivered))
            .build();

        let event = EventEnvelope::new(EventKind::OrderPlaced, "order-1", serde_json::json!({}));
        let results = manager.deliver(&event).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|(_, r)| r.is_err()).count(), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_siblings() {
        let delivered = Arc::new(AtomicUsize::new(0));
        async fn explode(event: EventEnvelope) -> Result<(), ProcessingError> {
            panic!("cannot handle {}", event.aggregate_id())
        }
        let panicking = Subscription::new("fragile", "on_order", "OrderPlaced", explode);

        let manager = SubscriptionManager::builder(TypeHierarchy::commerce())
            .subscribe(panicking)
            .subscribe(counting("healthy", EventKind::OrderPlaced, &delivered))
            .build();

        let event = EventEnvelope::new(EventKind::OrderPlaced, "order-1", serde_json::json!({}));
        let results = manager.deliver(&event).await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        let (_, result) = results
            .iter()
            .find(|(name, _)| name == "fragile::on_order")
            .unwrap();
        let err = result.as_ref().unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("cannot handle order-1"));
    }

    #[test]
    fn incompatible_callback_type_is_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let manager = SubscriptionManager::builder(TypeHierarchy::commerce())
            .subscribe(counting("mismatch", EventKind::OrderEvent, &counter).accepting("OrderPaid"))
            .subscribe(counting("widening", EventKind::OrderPaid, &counter).accepting("OrderEvent"))
            .build();

        assert_eq!(manager.subscription_count(), 1);
    }

    #[test]
    fn subscription_name_joins_owner_and_method() {
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = counting("audit", EventKind::OrderEvent, &counter);
        assert_eq!(subscription.name(), "audit::on_event");
        assert_eq!(subscription.owner(), "audit");
        assert_eq!(subscription.method(), "on_event");
    }
}
