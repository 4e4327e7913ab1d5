//! Handler trait and the startup-built handler registry.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use events::{EventEnvelope, ProcessingError};

use crate::error::{DispatchError, Result};

/// A processor bound to exactly one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs, statistics and health reports.
    fn name(&self) -> &str;

    /// The single event type tag this handler processes.
    fn event_type(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &EventEnvelope) -> std::result::Result<(), ProcessingError>;
}

/// What to do when two handlers declare the same event type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// The later registration replaces the earlier one.
    #[default]
    Overwrite,
    /// Building the registry fails.
    Reject,
}

impl FromStr for CollisionPolicy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(CollisionPolicy::Overwrite),
            "reject" => Ok(CollisionPolicy::Reject),
            other => Err(DispatchError::UnknownCollisionPolicy(other.to_string())),
        }
    }
}

/// Collects handlers before the registry is frozen.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: Vec<Arc<dyn EventHandler>>,
    policy: CollisionPolicy,
}

impl HandlerRegistryBuilder {
    /// Adds a handler.
    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Adds several handlers in order.
    pub fn register_all(mut self, handlers: impl IntoIterator<Item = Arc<dyn EventHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Sets the collision policy (default: overwrite).
    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateHandler`] on the first collision
    /// when the policy is [`CollisionPolicy::Reject`].
    pub fn build(self) -> Result<HandlerRegistry> {
        let mut handlers: HashMap<String, Arc<dyn EventHandler>> = HashMap::new();

        for handler in self.handlers {
            let event_type = handler.event_type().to_string();
            if let Some(existing) = handlers.get(&event_type) {
                if self.policy == CollisionPolicy::Reject {
                    return Err(DispatchError::DuplicateHandler {
                        event_type,
                        existing: existing.name().to_string(),
                        duplicate: handler.name().to_string(),
                    });
                }
                tracing::warn!(
                    event_type = %event_type,
                    replaced = existing.name(),
                    handler = handler.name(),
                    "handler registration overwrites an earlier handler"
                );
            }
            tracing::debug!(event_type = %event_type, handler = handler.name(), "handler registered");
            handlers.insert(event_type, handler);
        }

        tracing::info!(handlers = handlers.len(), "handler registry built");
        Ok(HandlerRegistry { handlers })
    }
}

/// Read-only map from event type to its handler.
///
/// Built once at startup; lookups take no lock.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// An empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_handler(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
