//! Delivers published events to their handler and subscribers.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use events::{EventEnvelope, EventId, ProcessingError, SequenceTracker};
use futures::FutureExt;
use futures::future::join_all;

use crate::monitor::ProcessingMonitor;
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::subscription::SubscriptionManager;

/// Result of one handler or subscriber invocation.
#[derive(Debug)]
pub struct InvocationOutcome {
    /// Handler name or `owner::method` of the subscriber.
    pub target: String,
    /// Number of attempts made, including the first.
    pub attempts: u32,
    pub result: Result<(), ProcessingError>,
    /// The timeout sweep declared the final attempt overdue before it
    /// finished. The monitor counted it as a timeout, not by `result`.
    pub timed_out: bool,
}

impl InvocationOutcome {
    /// Completed in time without error.
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok() && !self.timed_out
    }
}

/// What happened to one event during dispatch.
#[derive(Debug)]
pub struct DispatchReport {
    pub event_id: EventId,
    pub event_type: String,
    pub outcomes: Vec<InvocationOutcome>,
    /// Ordering anomaly detected before delivery, if sequence tracking is on.
    pub sequence_anomaly: Option<ProcessingError>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    /// Invocations that failed or were declared timed out.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn timed_out(&self) -> usize {
        self.outcomes.iter().filter(|o| o.timed_out).count()
    }

    /// True when every invocation succeeded.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// True when nobody was interested in the event.
    pub fn is_unhandled(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Dispatches each event to the registered handler for its exact type and
/// to every subscriber of the type or one of its supertypes.
///
/// Invocations run concurrently and independently: one failing target
/// never prevents delivery to the others. Each attempt is wrapped by the
/// [`ProcessingMonitor`].
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    monitor: Arc<ProcessingMonitor>,
    retry: RetryPolicy,
    sequence: Option<Arc<SequenceTracker>>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        monitor: Arc<ProcessingMonitor>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            monitor,
            retry: RetryPolicy::none(),
            sequence: None,
        }
    }

    /// Retries retryable failures according to `policy`.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Checks per-aggregate ordering before delivery.
    pub fn with_sequence_tracker(mut self, tracker: Arc<SequenceTracker>) -> Self {
        self.sequence = Some(tracker);
        self
    }

    pub fn monitor(&self) -> &Arc<ProcessingMonitor> {
        &self.monitor
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Delivers one event and reports every invocation's outcome.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type(), event_id = %event.event_id()))]
    pub async fn dispatch(&self, event: &EventEnvelope) -> DispatchReport {
        // detection only: an anomaly is reported, delivery still happens
        let sequence_anomaly = self
            .sequence
            .as_ref()
            .and_then(|tracker| tracker.observe(event).err());

        let mut invocations = Vec::new();

        if let Some(handler) = self.registry.get_handler(event.event_type()) {
            let name = handler.name().to_string();
            invocations.push(futures::future::Either::Left(async move {
                self.invoke(event, name, || handler.handle(event)).await
            }));
        }

        for subscription in self.subscriptions.matching(event) {
            invocations.push(futures::future::Either::Right(async move {
                self.invoke(event, subscription.name(), || subscription.invoke(event))
                    .await
            }));
        }

        if invocations.is_empty() {
            tracing::debug!("no handler or subscriber for event");
            metrics::counter!("events_unhandled_total").increment(1);
        }

        let outcomes = join_all(invocations).await;
        DispatchReport {
            event_id: event.event_id(),
            event_type: event.event_type().to_string(),
            outcomes,
            sequence_anomaly,
        }
    }

    async fn invoke<F, Fut>(&self, event: &EventEnvelope, target: String, call: F) -> InvocationOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ProcessingError>>,
    {
        let mut retries = 0;
        loop {
            let attempt = retries + 1;
            let mut context = self.monitor.start_monitoring(event, &target);
            let result = contain_panic(&target, async { call().await }).await;
            let timed_out = !self.monitor.complete_monitoring(
                &mut context,
                result.is_ok(),
                result.as_ref().err(),
            );

            let err = match result {
                Ok(()) => {
                    return InvocationOutcome {
                        target,
                        attempts: attempt,
                        result: Ok(()),
                        timed_out,
                    };
                }
                Err(err) => err.with_attempt_count(attempt),
            };

            if err.is_retryable() && retries < self.retry.max_retries {
                let delay = self.retry.delay_for_attempt(retries);
                tracing::warn!(
                    handler = %target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable processing failure, retrying"
                );
                metrics::counter!("event_processing_retries_total").increment(1);
                tokio::time::sleep(delay).await;
                retries += 1;
                continue;
            }

            if err.is_retryable() {
                tracing::error!(handler = %target, attempt, error = %err, "processing failed, retries exhausted");
            } else {
                tracing::error!(handler = %target, attempt, error = %err, "non-retryable processing failure");
            }
            return InvocationOutcome {
                target,
                attempts: attempt,
                result: Err(err),
                timed_out,
            };
        }
    }
}

/// Runs one invocation, turning a panic into a non-retryable failure.
pub(crate) async fn contain_panic<Fut>(target: &str, call: Fut) -> Result<(), ProcessingError>
where
    Fut: Future<Output = Result<(), ProcessingError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::error!(handler = %target, panic = %reason, "handler panicked");
            metrics::counter!("event_processing_panics_total").increment(1);
            Err(ProcessingError::non_retryable(
                format!("handler panicked: {reason}"),
                target,
            ))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
