//! In-process dispatch and processing reliability for domain events.
//!
//! This crate provides the consuming side of the pipeline:
//! - [`HandlerRegistry`]: one [`EventHandler`] per event type, exact-tag lookup
//! - [`SubscriptionManager`]: explicitly registered callbacks with
//!   supertype-compatible fan-out
//! - [`ProcessingMonitor`]: timing, outcome statistics, handler health and
//!   sweep-based timeout detection for every invocation
//! - [`EventDispatcher`]: delivers one event to its handler and
//!   subscribers, each wrapped by the monitor and retried per [`RetryPolicy`]

pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod statistics;
pub mod subscription;

pub use dispatcher::{DispatchReport, EventDispatcher, InvocationOutcome};
pub use error::{DispatchError, Result};
pub use monitor::{MonitorConfig, ProcessingContext, ProcessingMonitor};
pub use registry::{CollisionPolicy, EventHandler, HandlerRegistry, HandlerRegistryBuilder};
pub use retry::RetryPolicy;
pub use statistics::{
    EventTypeSnapshot, EventTypeStatistics, HandlerHealth, HealthStatus, ProcessingStatistics,
};
pub use subscription::{Subscription, SubscriptionManager, SubscriptionManagerBuilder};
