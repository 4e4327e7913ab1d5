use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EventError, Result};
use crate::{AggregateId, EventId, EventKind};

/// Immutable record of one domain occurrence.
///
/// The id and the occurrence timestamp are assigned once, at creation.
/// Fields are only reachable through accessors, so a stage that needs its
/// own copy clones the envelope; nothing downstream of the aggregate can
/// alter what was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    aggregate_id: AggregateId,
    event_type: String,
    occurred_on: DateTime<Utc>,
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Creates an envelope for a known event kind.
    pub fn new(
        kind: EventKind,
        aggregate_id: impl Into<AggregateId>,
        payload: serde_json::Value,
    ) -> Self {
        Self::of_type(kind.event_type(), aggregate_id, payload)
    }

    /// Creates an envelope for an arbitrary type tag.
    pub fn of_type(
        event_type: impl Into<String>,
        aggregate_id: impl Into<AggregateId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            occurred_on: Utc::now(),
            payload,
            sequence: None,
            metadata: HashMap::new(),
        }
    }

    /// Creates an envelope from a serializable payload.
    pub fn from_payload<T: Serialize>(
        kind: EventKind,
        aggregate_id: impl Into<AggregateId>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self::new(kind, aggregate_id, serde_json::to_value(payload)?))
    }

    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// The type tag, e.g. `"OrderPlaced"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The known kind for this envelope's tag, if any.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_event_type(&self.event_type)
    }

    pub fn occurred_on(&self) -> DateTime<Utc> {
        self.occurred_on
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Deserializes the payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Per-aggregate sequence number, when the raising aggregate tracks one.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    occurred_on: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    sequence: Option<u64>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type from a known kind.
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.event_type = Some(kind.event_type().to_string());
        self
    }

    /// Sets the event type tag.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: impl Into<AggregateId>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    /// Sets the occurrence time. If not set, the current time will be used.
    pub fn occurred_on(mut self, occurred_on: DateTime<Utc>) -> Self {
        self.occurred_on = Some(occurred_on);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the per-aggregate sequence number.
    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::MissingField`] if the event type or aggregate
    /// id is not set. A missing payload defaults to JSON `null`.
    pub fn build(self) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.ok_or(EventError::MissingField("event_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(EventError::MissingField("aggregate_id"))?,
            occurred_on: self.occurred_on.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            sequence: self.sequence,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelopes_get_distinct_ids() {
        let a = EventEnvelope::new(EventKind::CartItemAdded, "cart-1", serde_json::json!({}));
        let b = EventEnvelope::new(EventKind::CartItemAdded, "cart-1", serde_json::json!({}));
        assert_ne!(a.event_id(), b.event_id());
        assert_eq!(a.event_type(), "CartItemAdded");
        assert_eq!(a.kind(), Some(EventKind::CartItemAdded));
    }

    #[test]
    fn clones_are_equal_and_independent() {
        let original = EventEnvelope::new(EventKind::OrderPaid, "order-9", serde_json::json!({"amount": 5}));
        let copy = original.clone();
        assert_eq!(copy, original);
        assert_eq!(copy.occurred_on(), original.occurred_on());
    }

    #[test]
    fn builder_sets_all_fields() {
        let id = EventId::new();
        let envelope = EventEnvelope::builder()
            .event_id(id)
            .kind(EventKind::OrderShipped)
            .aggregate_id("order-3")
            .payload_raw(serde_json::json!({"carrier": "ups"}))
            .sequence(4)
            .metadata("correlation_id", serde_json::json!("abc"))
            .build()
            .unwrap();

        assert_eq!(envelope.event_id(), id);
        assert_eq!(envelope.event_type(), "OrderShipped");
        assert_eq!(envelope.aggregate_id().as_str(), "order-3");
        assert_eq!(envelope.sequence(), Some(4));
        assert_eq!(
            envelope.metadata().get("correlation_id"),
            Some(&serde_json::json!("abc"))
        );
    }

    #[test]
    fn builder_reports_missing_fields() {
        let err = EventEnvelope::builder().aggregate_id("x").build().unwrap_err();
        assert!(matches!(err, EventError::MissingField("event_type")));

        let err = EventEnvelope::builder().event_type("X").build().unwrap_err();
        assert!(matches!(err, EventError::MissingField("aggregate_id")));
    }

    #[test]
    fn payload_deserializes_into_concrete_type() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Paid {
            amount: u32,
        }
        let envelope =
            EventEnvelope::from_payload(EventKind::OrderPaid, "order-1", &Paid { amount: 12 }).unwrap();
        assert_eq!(envelope.payload_as::<Paid>().unwrap(), Paid { amount: 12 });
    }

    #[test]
    fn serialization_omits_empty_optional_fields() {
        let envelope = EventEnvelope::new(EventKind::PromotionExpired, "promo-1", serde_json::json!(null));
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("sequence").is_none());
        assert!(json.get("metadata").is_none());
        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
