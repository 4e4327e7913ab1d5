//! Event model errors and the processing failure taxonomy.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::{AggregateId, EventEnvelope};

/// Errors raised while building envelopes or the type hierarchy.
#[derive(Debug, Error)]
pub enum EventError {
    /// A required builder field was not set.
    #[error("Missing required envelope field: {0}")]
    MissingField(&'static str),

    /// The payload could not be converted to JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A hierarchy declaration would make a tag its own ancestor.
    #[error("Declaring {child} as a subtype of {parent} would create a cycle")]
    HierarchyCycle { child: String, parent: String },
}

/// Result type for event model operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// What went wrong while processing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingErrorKind {
    /// The handler reported a failure.
    Failed,

    /// The monitor declared the invocation overdue.
    Timeout { timeout_ms: u64, actual_ms: u64 },

    /// Events of one aggregate arrived out of order.
    Sequence {
        aggregate_id: AggregateId,
        expected: u64,
        actual: u64,
    },
}

/// Failure signal for one handler invocation.
///
/// Retryable errors may be re-attempted by the caller with
/// [`ProcessingError::with_retry_attempt`]; non-retryable ones must be
/// surfaced to the operator. Timeouts are retryable, sequence anomalies
/// are not: reconciling out-of-order events is left to the caller.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
    event: Option<Box<EventEnvelope>>,
    handler_name: String,
    attempt_count: u32,
    retryable: bool,
    kind: ProcessingErrorKind,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ProcessingError {
    fn with_kind(
        message: impl Into<String>,
        handler_name: impl Into<String>,
        retryable: bool,
        kind: ProcessingErrorKind,
    ) -> Self {
        Self {
            message: message.into(),
            event: None,
            handler_name: handler_name.into(),
            attempt_count: 1,
            retryable,
            kind,
            source: None,
        }
    }

    /// Creates a retryable processing failure.
    pub fn new(message: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self::with_kind(message, handler_name, true, ProcessingErrorKind::Failed)
    }

    /// Creates a failure that must not be retried.
    pub fn non_retryable(message: impl Into<String>, handler_name: impl Into<String>) -> Self {
        Self::with_kind(message, handler_name, false, ProcessingErrorKind::Failed)
    }

    /// Creates a timeout failure from a monitor-detected overrun.
    pub fn timeout(
        event: &EventEnvelope,
        handler_name: impl Into<String>,
        timeout: Duration,
        actual: Duration,
    ) -> Self {
        let handler_name = handler_name.into();
        let timeout_ms = timeout.as_millis() as u64;
        let actual_ms = actual.as_millis() as u64;
        let message = format!(
            "{handler_name} exceeded {timeout_ms}ms processing {} (ran {actual_ms}ms)",
            event.event_type()
        );
        Self::with_kind(
            message,
            handler_name,
            true,
            ProcessingErrorKind::Timeout {
                timeout_ms,
                actual_ms,
            },
        )
        .with_event(event.clone())
    }

    /// Creates a sequence anomaly for the event's aggregate.
    pub fn sequence(
        event: &EventEnvelope,
        handler_name: impl Into<String>,
        expected: u64,
        actual: u64,
    ) -> Self {
        let aggregate_id = event.aggregate_id().clone();
        let message = format!(
            "Out-of-order event for aggregate {aggregate_id}: expected sequence {expected}, got {actual}"
        );
        Self::with_kind(
            message,
            handler_name,
            false,
            ProcessingErrorKind::Sequence {
                aggregate_id,
                expected,
                actual,
            },
        )
        .with_event(event.clone())
    }

    /// Attaches the event being processed.
    pub fn with_event(mut self, event: EventEnvelope) -> Self {
        self.event = Some(Box::new(event));
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns a copy for the next attempt, with `attempt_count` incremented.
    pub fn with_retry_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt_count += 1;
        next
    }

    /// Stamps the attempt on which this failure happened.
    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count.max(1);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn event(&self) -> Option<&EventEnvelope> {
        self.event.as_deref()
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn kind(&self) -> &ProcessingErrorKind {
        &self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ProcessingErrorKind::Timeout { .. })
    }

    pub fn is_sequence_anomaly(&self) -> bool {
        matches!(self.kind, ProcessingErrorKind::Sequence { .. })
    }
}
