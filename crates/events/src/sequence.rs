//! Per-aggregate ordering anomaly detection.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{AggregateId, EventEnvelope, ProcessingError};

const TRACKER_NAME: &str = "sequence-tracker";

/// Tracks the last sequence number seen per aggregate.
///
/// The log sink partitions by aggregate id, so consumers should observe
/// each aggregate's events in order. This tracker only detects a broken
/// order; it never buffers or reorders.
///
/// Memory grows with the number of distinct aggregates. Use
/// [`with_max_aggregates`](Self::with_max_aggregates) to cap it; once the
/// cap is reached, new aggregates pass unchecked until [`reset`](Self::reset)
/// frees a slot.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_seen: DashMap<AggregateId, u64>,
    max_aggregates: Option<usize>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks at most `max` aggregates.
    pub fn with_max_aggregates(max: usize) -> Self {
        Self {
            last_seen: DashMap::new(),
            max_aggregates: Some(max),
        }
    }

    /// Checks an event against the aggregate's last observed sequence.
    ///
    /// Events without a sequence always pass. The first sequenced event of
    /// an aggregate sets the baseline. A gap or a duplicate yields a
    /// sequence anomaly and leaves the baseline untouched.
    pub fn observe(&self, event: &EventEnvelope) -> Result<(), ProcessingError> {
        let Some(actual) = event.sequence() else {
            return Ok(());
        };

        // checked before taking the entry lock; `len` reads every shard
        let full = self.max_aggregates.is_some_and(|max| {
            !self.last_seen.contains_key(event.aggregate_id()) && self.last_seen.len() >= max
        });
        if full {
            tracing::debug!(
                aggregate_id = %event.aggregate_id(),
                "sequence tracker full, aggregate not tracked"
            );
            metrics::counter!("event_sequence_untracked_total").increment(1);
            return Ok(());
        }

        match self.last_seen.entry(event.aggregate_id().clone()) {
            Entry::Vacant(slot) => {
                slot.insert(actual);
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                let last = *slot.get();
                let Some(expected) = last.checked_add(1) else {
                    tracing::warn!(
                        aggregate_id = %event.aggregate_id(),
                        event_type = event.event_type(),
                        last,
                        actual,
                        "sequence anomaly detected after the maximum sequence number"
                    );
                    metrics::counter!("event_sequence_anomalies_total").increment(1);
                    return Err(ProcessingError::sequence(event, TRACKER_NAME, last, actual));
                };
                if actual == expected {
                    slot.insert(actual);
                    return Ok(());
                }
                tracing::warn!(
                    aggregate_id = %event.aggregate_id(),
                    event_type = event.event_type(),
                    expected,
                    actual,
                    "sequence anomaly detected"
                );
                metrics::counter!("event_sequence_anomalies_total").increment(1);
                Err(ProcessingError::sequence(event, TRACKER_NAME, expected, actual))
            }
        }
    }

    /// Last accepted sequence for an aggregate.
    pub fn last_sequence(&self, aggregate_id: &AggregateId) -> Option<u64> {
        self.last_seen.get(aggregate_id).map(|entry| *entry)
    }

    /// Forgets an aggregate, e.g. after the caller reconciled its events.
    pub fn reset(&self, aggregate_id: &AggregateId) {
        self.last_seen.remove(aggregate_id);
    }

    /// Number of aggregates currently tracked.
    pub fn tracked_aggregates(&self) -> usize {
        self.last_seen.len()
    }
}
