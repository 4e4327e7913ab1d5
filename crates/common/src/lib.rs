//! Identifier types shared by every crate of the event pipeline.

pub mod types;

pub use types::{AggregateId, EventId};
