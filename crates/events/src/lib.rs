//! Event model for the domain-event pipeline.
//!
//! This crate holds the data that flows through every other stage:
//! - [`EventEnvelope`], the immutable record of one domain occurrence
//! - [`EventKind`] and [`TypeHierarchy`], the known event kinds and the
//!   supertype relation used for subscriber fan-out
//! - [`ProcessingError`], the failure taxonomy shared by handlers, the
//!   processing monitor and callers deciding whether to retry
//! - [`SequenceTracker`], per-aggregate ordering anomaly detection

pub mod envelope;
pub mod error;
pub mod kind;
pub mod sequence;

pub use common::{AggregateId, EventId};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder};
pub use error::{EventError, ProcessingError, ProcessingErrorKind, Result};
pub use kind::{EventKind, TypeHierarchy};
pub use sequence::SequenceTracker;
