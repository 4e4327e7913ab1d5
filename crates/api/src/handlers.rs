//! Subscribers the service registers on its own.

use dispatch::Subscription;
use events::EventKind;

/// Writes a structured log line for every event, whatever its type.
pub fn audit_trail() -> Subscription {
    Subscription::new(
        "audit-trail",
        "record",
        EventKind::ROOT.event_type(),
        |event| async move {
            tracing::info!(
                target: "audit",
                event_id = %event.event_id(),
                event_type = event.event_type(),
                aggregate_id = %event.aggregate_id(),
                occurred_on = %event.occurred_on(),
                "domain event"
            );
            Ok(())
        },
    )
}

/// Every subscription the service starts with.
pub fn default_subscriptions() -> Vec<Subscription> {
    vec![audit_trail()]
}
