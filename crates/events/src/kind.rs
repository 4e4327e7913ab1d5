//! Known event kinds and the type hierarchy used for subscriber matching.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Every event kind the commerce model raises.
///
/// Group kinds (`CustomerEvent`, `OrderEvent`, ...) are never raised
/// directly; they exist so that a subscriber can listen to a whole family
/// of events. [`EventKind::DomainEvent`] is the root of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    DomainEvent,

    CustomerEvent,
    CustomerRegistered,
    CustomerProfileUpdated,

    OrderEvent,
    OrderPlaced,
    OrderPaid,
    OrderShipped,
    OrderCancelled,

    CartEvent,
    CartItemAdded,
    CartItemRemoved,
    CartCheckedOut,

    PromotionEvent,
    PromotionActivated,
    PromotionApplied,
    PromotionExpired,
}

impl EventKind {
    /// Root of the hierarchy; every tag is assignable to it.
    pub const ROOT: EventKind = EventKind::DomainEvent;

    /// All kinds, group kinds first within each family.
    pub const ALL: [EventKind; 17] = [
        EventKind::DomainEvent,
        EventKind::CustomerEvent,
        EventKind::CustomerRegistered,
        EventKind::CustomerProfileUpdated,
        EventKind::OrderEvent,
        EventKind::OrderPlaced,
        EventKind::OrderPaid,
        EventKind::OrderShipped,
        EventKind::OrderCancelled,
        EventKind::CartEvent,
        EventKind::CartItemAdded,
        EventKind::CartItemRemoved,
        EventKind::CartCheckedOut,
        EventKind::PromotionEvent,
        EventKind::PromotionActivated,
        EventKind::PromotionApplied,
        EventKind::PromotionExpired,
    ];

    /// Returns the stable type tag used as dispatch and routing key.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::DomainEvent => "DomainEvent",
            EventKind::CustomerEvent => "CustomerEvent",
            EventKind::CustomerRegistered => "CustomerRegistered",
            EventKind::CustomerProfileUpdated => "CustomerProfileUpdated",
            EventKind::OrderEvent => "OrderEvent",
            EventKind::OrderPlaced => "OrderPlaced",
            EventKind::OrderPaid => "OrderPaid",
            EventKind::OrderShipped => "OrderShipped",
            EventKind::OrderCancelled => "OrderCancelled",
            EventKind::CartEvent => "CartEvent",
            EventKind::CartItemAdded => "CartItemAdded",
            EventKind::CartItemRemoved => "CartItemRemoved",
            EventKind::CartCheckedOut => "CartCheckedOut",
            EventKind::PromotionEvent => "PromotionEvent",
            EventKind::PromotionActivated => "PromotionActivated",
            EventKind::PromotionApplied => "PromotionApplied",
            EventKind::PromotionExpired => "PromotionExpired",
        }
    }

    /// Returns the direct supertype, or `None` for the root.
    pub fn parent(&self) -> Option<EventKind> {
        match self {
            EventKind::DomainEvent => None,
            EventKind::CustomerEvent
            | EventKind::OrderEvent
            | EventKind::CartEvent
            | EventKind::PromotionEvent => Some(EventKind::DomainEvent),
            EventKind::CustomerRegistered | EventKind::CustomerProfileUpdated => {
                Some(EventKind::CustomerEvent)
            }
            EventKind::OrderPlaced
            | EventKind::OrderPaid
            | EventKind::OrderShipped
            | EventKind::OrderCancelled => Some(EventKind::OrderEvent),
            EventKind::CartItemAdded | EventKind::CartItemRemoved | EventKind::CartCheckedOut => {
                Some(EventKind::CartEvent)
            }
            EventKind::PromotionActivated
            | EventKind::PromotionApplied
            | EventKind::PromotionExpired => Some(EventKind::PromotionEvent),
        }
    }

    /// Group kinds only describe families and are never raised.
    pub fn is_abstract(&self) -> bool {
        matches!(
            self,
            EventKind::DomainEvent
                | EventKind::CustomerEvent
                | EventKind::OrderEvent
                | EventKind::CartEvent
                | EventKind::PromotionEvent
        )
    }

    /// Looks up a kind by its type tag.
    pub fn from_event_type(tag: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.event_type() == tag)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Child → parent relation over event type tags.
///
/// Built once at startup and read-only afterwards; the subscription
/// manager holds it behind an `Arc` and consults it on every dispatch.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    parents: HashMap<String, String>,
}

impl TypeHierarchy {
    /// Creates a hierarchy that only knows the root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the hierarchy of all [`EventKind`]s.
    pub fn commerce() -> Self {
        let parents = EventKind::ALL
            .iter()
            .filter_map(|kind| {
                kind.parent()
                    .map(|parent| (kind.event_type().to_string(), parent.event_type().to_string()))
            })
            .collect();
        Self { parents }
    }

    /// Declares `child` as a direct subtype of `parent`.
    ///
    /// Re-declaring a child replaces its parent. Declarations that would
    /// make a tag its own ancestor are rejected.
    pub fn declare(
        &mut self,
        child: impl Into<String>,
        parent: impl Into<String>,
    ) -> Result<(), EventError> {
        let child = child.into();
        let parent = parent.into();
        let cyclic = child == EventKind::ROOT.event_type()
            || self.lineage(&parent).contains(&child.as_str());
        if cyclic {
            return Err(EventError::HierarchyCycle { child, parent });
        }
        self.parents.insert(child, parent);
        Ok(())
    }

    /// Returns the direct parent of a tag, if declared.
    pub fn parent_of(&self, tag: &str) -> Option<&str> {
        self.parents.get(tag).map(String::as_str)
    }

    /// Returns true if the tag was declared (or is the root).
    pub fn contains(&self, tag: &str) -> bool {
        tag == EventKind::ROOT.event_type() || self.parents.contains_key(tag)
    }

    /// Returns `tag` followed by all of its ancestors, nearest first.
    pub fn lineage<'a>(&'a self, tag: &'a str) -> Vec<&'a str> {
        let mut lineage = vec![tag];
        let mut current = tag;
        while let Some(parent) = self.parent_of(current) {
            if lineage.contains(&parent) || lineage.len() > self.parents.len() + 1 {
                break;
            }
            lineage.push(parent);
            current = parent;
        }
        lineage
    }

    /// Returns true if an event tagged `actual` may be delivered to a
    /// subscriber declared for `declared`.
    ///
    /// Unknown tags are assignable only to themselves and to the root.
    pub fn is_assignable(&self, declared: &str, actual: &str) -> bool {
        declared == actual
            || declared == EventKind::ROOT.event_type()
            || self.lineage(actual).contains(&declared)
    }
}
