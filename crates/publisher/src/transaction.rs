//! Per-transaction staging of raised events.

use std::sync::Arc;

use events::EventEnvelope;
use uuid::Uuid;

use crate::publisher::EventPublisher;

/// Events raised during one unit of work, held until it commits.
///
/// Each transaction owns its buffer; nothing is shared between
/// transactions. Dropping a transaction that still holds events discards
/// them, as a rollback would.
#[derive(Debug)]
pub struct EventTransaction {
    id: Uuid,
    pending: Vec<EventEnvelope>,
}

impl EventTransaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stages one event. `None` is ignored.
    pub fn add_pending_event(&mut self, event: impl Into<Option<EventEnvelope>>) {
        if let Some(event) = event.into() {
            self.pending.push(event);
        }
    }

    /// Stages several events, keeping their order.
    pub fn add_pending_events(&mut self, events: impl IntoIterator<Item = EventEnvelope>) {
        self.pending.extend(events);
    }

    /// Copy of the staged events.
    pub fn pending_events(&self) -> Vec<EventEnvelope> {
        self.pending.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear_pending_events(&mut self) {
        self.pending.clear();
    }

    fn take_pending(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.pending)
    }
}

impl Default for EventTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventTransaction {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                transaction_id = %self.id,
                discarded = self.pending.len(),
                "transaction dropped without commit or rollback, discarding pending events"
            );
            metrics::counter!("events_discarded_total", "reason" => "dropped")
                .increment(self.pending.len() as u64);
        }
    }
}

/// Connects transaction boundaries to a publisher.
///
/// The surrounding transaction infrastructure calls
/// [`after_commit`](Self::after_commit) once the commit is durable and
/// [`after_rollback`](Self::after_rollback) on every rollback.
#[derive(Clone)]
pub struct TransactionalPublisher {
    publisher: Arc<dyn EventPublisher>,
}

impl TransactionalPublisher {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Opens a fresh, empty transaction.
    pub fn begin(&self) -> EventTransaction {
        let tx = EventTransaction::new();
        tracing::trace!(transaction_id = %tx.id(), "transaction started");
        tx
    }

    /// Publishes the staged events in order, then clears the buffer.
    ///
    /// Calling this again for the same transaction publishes nothing.
    #[tracing::instrument(skip_all, fields(transaction_id = %tx.id(), publisher = self.publisher.name()))]
    pub async fn after_commit(&self, tx: &mut EventTransaction) {
        let events = tx.take_pending();
        if events.is_empty() {
            tracing::trace!("nothing to publish");
            return;
        }

        let count = events.len();
        self.publisher.publish_all(events).await;
        metrics::counter!("transactions_flushed_total").increment(1);
        tracing::debug!(published = count, "transaction events published");
    }

    /// Discards the staged events without publishing them.
    pub fn after_rollback(&self, tx: &mut EventTransaction) {
        let discarded = tx.take_pending().len();
        if discarded > 0 {
            metrics::counter!("events_discarded_total", "reason" => "rollback")
                .increment(discarded as u64);
        }
        tracing::debug!(transaction_id = %tx.id(), discarded, "transaction rolled back");
    }
}

impl std::fmt::Debug for TransactionalPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalPublisher")
            .field("publisher", &self.publisher.name())
            .finish()
    }
}
