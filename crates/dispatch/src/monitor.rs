//! Processing monitor: outcome, duration and timeout tracking per invocation.
//!
//! Each invocation moves through `started → completed-success |
//! completed-failure | timed-out`. Timeouts are found by a periodic sweep
//! over the active set, so detection latency is bounded by the sweep
//! interval. A timed-out invocation is not cancelled; if it completes
//! later, the completion is ignored because the invocation was already
//! counted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use events::{EventEnvelope, ProcessingError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::statistics::{
    EventTypeStatistics, HandlerHealth, HandlerHealthState, HealthStatus, ProcessingStatistics,
    rate,
};

/// Monitor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Invocations running longer than this are declared timed out.
    pub timeout: Duration,
    /// How often the sweeper scans the active set.
    pub sweep_interval: Duration,
    /// Consecutive failures after which a handler is degraded.
    pub degraded_after: u32,
    /// Consecutive failures after which a handler is unhealthy.
    pub unhealthy_after: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            degraded_after: 3,
            unhealthy_after: 5,
        }
    }
}

/// Bookkeeping for one in-flight invocation.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    context_id: String,
    event: EventEnvelope,
    handler_name: String,
    start_time: DateTime<Utc>,
    started: Instant,
    end_time: Option<DateTime<Utc>>,
    completed: bool,
    generation: u64,
}

impl ProcessingContext {
    fn new(event: &EventEnvelope, handler_name: &str, generation: u64) -> Self {
        Self {
            context_id: Uuid::new_v4().to_string(),
            event: event.clone(),
            handler_name: handler_name.to_string(),
            start_time: Utc::now(),
            started: Instant::now(),
            end_time: None,
            completed: false,
            generation,
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn event(&self) -> &EventEnvelope {
        &self.event
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Time since the invocation started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn mark_completed(&mut self) {
        self.end_time = Some(Utc::now());
        self.completed = true;
    }
}

/// Tracks every handler and subscriber invocation.
///
/// Shared between dispatch tasks behind an `Arc`. The active set and the
/// per-type/per-handler maps are sharded concurrent maps; global counters
/// are atomics.
///
/// `health` holds one entry per handler or subscriber name, so it is
/// bounded by the registered targets and only emptied by a reset.
#[derive(Debug)]
pub struct ProcessingMonitor {
    config: MonitorConfig,
    active: DashMap<String, ProcessingContext>,
    generation: AtomicU64,
    total_processed: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    by_event_type: DashMap<String, EventTypeStatistics>,
    health: DashMap<String, HandlerHealthState>,
}

impl Default for ProcessingMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl ProcessingMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            active: DashMap::new(),
            generation: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            by_event_type: DashMap::new(),
            health: DashMap::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Registers a new invocation in the active set.
    pub fn start_monitoring(&self, event: &EventEnvelope, handler_name: &str) -> ProcessingContext {
        let context =
            ProcessingContext::new(event, handler_name, self.generation.load(Ordering::Acquire));
        self.active
            .insert(context.context_id.clone(), context.clone());
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("event_processing_active").set(self.active.len() as f64);

        tracing::trace!(
            context_id = %context.context_id,
            handler = handler_name,
            event_type = event.event_type(),
            "processing started"
        );
        context
    }

    /// Records the outcome of an invocation.
    ///
    /// Returns `false` when the sweep already declared the invocation timed
    /// out; the late completion is then not counted a second time.
    pub fn complete_monitoring(
        &self,
        context: &mut ProcessingContext,
        success: bool,
        error: Option<&ProcessingError>,
    ) -> bool {
        context.mark_completed();
        if self.active.remove(&context.context_id).is_none() {
            tracing::debug!(
                context_id = %context.context_id,
                handler = %context.handler_name,
                "completion arrived after timeout, ignoring"
            );
            return false;
        }
        if self.is_stale(context) {
            tracing::debug!(
                context_id = %context.context_id,
                handler = %context.handler_name,
                "invocation started before the last reset, not counted"
            );
            return true;
        }

        let duration = context.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let event_type = context.event.event_type();

        let outcome = if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
            self.health
                .entry(context.handler_name.clone())
                .or_default()
                .record_success();
            "success"
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            self.health
                .entry(context.handler_name.clone())
                .or_default()
                .record_failure(error.map(ToString::to_string));
            "failure"
        };
        self.record_event_type(event_type, duration_ms, success);

        metrics::counter!("event_processing_total", "outcome" => outcome).increment(1);
        metrics::histogram!(
            "event_processing_duration_seconds",
            "event_type" => event_type.to_string()
        )
        .record(duration.as_secs_f64());
        metrics::gauge!("event_processing_active").set(self.active.len() as f64);

        tracing::debug!(
            context_id = %context.context_id,
            handler = %context.handler_name,
            event_type,
            duration_ms,
            outcome,
            "processing completed"
        );
        true
    }

    /// Declares an invocation timed out.
    ///
    /// Returns the timeout error, or `None` if the invocation had already
    /// completed.
    pub fn record_timeout(
        &self,
        context: &ProcessingContext,
        timeout: Duration,
    ) -> Option<ProcessingError> {
        let (_, context) = self.active.remove(&context.context_id)?;
        if self.is_stale(&context) {
            tracing::debug!(
                context_id = %context.context_id,
                handler = %context.handler_name,
                "overdue invocation started before the last reset, not counted"
            );
            return None;
        }

        let actual = context.elapsed();
        let error = ProcessingError::timeout(&context.event, &context.handler_name, timeout, actual);

        self.timeout_count.fetch_add(1, Ordering::Relaxed);
        self.record_event_type(context.event.event_type(), actual.as_millis() as u64, false);
        self.health
            .entry(context.handler_name.clone())
            .or_default()
            .record_timeout(error.to_string());

        metrics::counter!("event_processing_total", "outcome" => "timeout").increment(1);
        metrics::gauge!("event_processing_active").set(self.active.len() as f64);

        tracing::warn!(
            context_id = %context.context_id,
            handler = %context.handler_name,
            event_type = context.event.event_type(),
            event_id = %context.event.event_id(),
            timeout_ms = timeout.as_millis() as u64,
            actual_ms = actual.as_millis() as u64,
            "event processing timed out"
        );
        Some(error)
    }

    /// Sweeps the active set and times out every invocation older than `timeout`.
    pub fn check_for_timeouts(&self, timeout: Duration) -> Vec<ProcessingError> {
        let overdue: Vec<ProcessingContext> = self
            .active
            .iter()
            .filter(|entry| entry.value().elapsed() >= timeout)
            .map(|entry| entry.value().clone())
            .collect();

        overdue
            .iter()
            .filter_map(|context| self.record_timeout(context, timeout))
            .collect()
    }

    /// Spawns the periodic timeout sweep, stopped by cancelling `token`.
    pub fn spawn_timeout_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = self.config.sweep_interval;
        let timeout = self.config.timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let timed_out = monitor.check_for_timeouts(timeout);
                        if !timed_out.is_empty() {
                            tracing::info!(count = timed_out.len(), "timeout sweep declared invocations overdue");
                        }
                    }
                }
            }
            tracing::debug!("timeout sweeper stopped");
        })
    }

    /// Snapshot of aggregate and per-event-type counters.
    pub fn get_statistics(&self) -> ProcessingStatistics {
        let total_processed = self.total_processed.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let timeout_count = self.timeout_count.load(Ordering::Relaxed);

        let by_event_type = self
            .by_event_type
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();

        ProcessingStatistics {
            total_processed,
            success_count,
            failure_count,
            timeout_count,
            active_count: self.active.len(),
            success_rate: rate(success_count, total_processed),
            failure_rate: rate(failure_count, total_processed),
            timeout_rate: rate(timeout_count, total_processed),
            by_event_type,
        }
    }

    /// Health of every handler and subscriber seen so far.
    pub fn get_all_health(&self) -> BTreeMap<String, HandlerHealth> {
        self.health
            .iter()
            .map(|entry| {
                let health = entry.value().snapshot(
                    entry.key(),
                    self.config.degraded_after,
                    self.config.unhealthy_after,
                );
                (entry.key().clone(), health)
            })
            .collect()
    }

    /// Worst status across all handlers; healthy when none were seen.
    pub fn overall_health(&self) -> HealthStatus {
        self.get_all_health()
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Number of invocations currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Administrative reset of all counters, statistics and health.
    ///
    /// In-flight invocations stay in the active set, but their outcomes
    /// belong to the previous period and are not counted after the reset.
    pub fn reset_statistics(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.total_processed.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.timeout_count.store(0, Ordering::Relaxed);
        self.by_event_type.clear();
        self.health.clear();
        tracing::info!("processing statistics reset");
    }

    fn is_stale(&self, context: &ProcessingContext) -> bool {
        context.generation != self.generation.load(Ordering::Acquire)
    }

    fn record_event_type(&self, event_type: &str, duration_ms: u64, success: bool) {
        if let Some(stats) = self.by_event_type.get(event_type) {
            stats.record(duration_ms, success);
            return;
        }
        self.by_event_type
            .entry(event_type.to_string())
            .or_default()
            .record(duration_ms, success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::EventKind;

    fn event(kind: EventKind) -> EventEnvelope {
        EventEnvelope::new(kind, "order-1", serde_json::json!({}))
    }

    #[test]
    fn start_registers_active_context() {
        let monitor = ProcessingMonitor::default();
        let context = monitor.start_monitoring(&event(EventKind::OrderPlaced), "stock-reserver");

        assert_eq!(monitor.active_count(), 1);
        assert!(!context.is_completed());
        assert_eq!(context.handler_name(), "stock-reserver");
        assert_eq!(monitor.get_statistics().total_processed, 1);
    }

    #[test]
    fn completion_updates_counters_and_rates() {
        let monitor = ProcessingMonitor::default();
        let failure = ProcessingError::new("boom", "h");

        for i in 0..4 {
            let mut context = monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");
            if i == 0 {
                monitor.complete_monitoring(&mut context, false, Some(&failure));
            } else {
                monitor.complete_monitoring(&mut context, true, None);
            }
            assert!(context.is_completed());
            assert!(context.end_time().is_some());
        }

        let stats = monitor.get_statistics();
        assert_eq!(stats.total_processed, 4);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.success_rate, 0.75);
        assert_eq!(stats.failure_rate, 0.25);
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.by_event_type["OrderPlaced"].total_count, 4);
    }

    #[test]
    fn rates_are_zero_when_nothing_processed() {
        let stats = ProcessingMonitor::default().get_statistics();
        assert_eq!(stats.total_processed, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.failure_rate, 0.0);
        assert_eq!(stats.timeout_rate, 0.0);
    }

    #[test]
    fn timeout_is_counted_once_and_late_completion_ignored() {
        let monitor = ProcessingMonitor::default();
        let mut context = monitor.start_monitoring(&event(EventKind::OrderPaid), "slow");

        let timed_out = monitor.check_for_timeouts(Duration::ZERO);
        assert_eq!(timed_out.len(), 1);
        assert!(timed_out[0].is_timeout());
        assert_eq!(timed_out[0].handler_name(), "slow");

        assert!(!monitor.complete_monitoring(&mut context, true, None));
        assert!(monitor.record_timeout(&context, Duration::ZERO).is_none());

        let stats = monitor.get_statistics();
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.by_event_type["OrderPaid"].failure_count, 1);
    }

    #[test]
    fn sweep_leaves_recent_invocations_alone() {
        let monitor = ProcessingMonitor::default();
        monitor.start_monitoring(&event(EventKind::OrderPaid), "fast");
        assert!(monitor.check_for_timeouts(Duration::from_secs(60)).is_empty());
        assert_eq!(monitor.active_count(), 1);
    }

    #[test]
    fn health_reflects_consecutive_failures() {
        let monitor = ProcessingMonitor::new(MonitorConfig {
            degraded_after: 1,
            unhealthy_after: 2,
            ..MonitorConfig::default()
        });
        let failure = ProcessingError::new("boom", "flaky");

        let mut ok = monitor.start_monitoring(&event(EventKind::CartItemAdded), "steady");
        monitor.complete_monitoring(&mut ok, true, None);
        for _ in 0..2 {
            let mut context = monitor.start_monitoring(&event(EventKind::CartItemAdded), "flaky");
            monitor.complete_monitoring(&mut context, false, Some(&failure));
        }

        let health = monitor.get_all_health();
        assert_eq!(health["steady"].status, HealthStatus::Healthy);
        assert_eq!(health["flaky"].status, HealthStatus::Unhealthy);
        assert_eq!(health["flaky"].last_error.as_deref(), Some("boom"));
        assert_eq!(monitor.overall_health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn reset_clears_statistics_but_keeps_active_set() {
        let monitor = ProcessingMonitor::default();
        let mut done = monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");
        monitor.complete_monitoring(&mut done, true, None);
        monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");

        monitor.reset_statistics();

        let stats = monitor.get_statistics();
        assert_eq!(stats.total_processed, 0);
        assert!(stats.by_event_type.is_empty());
        assert_eq!(stats.active_count, 1);
        assert!(monitor.get_all_health().is_empty());
    }

    #[test]
    fn invocations_in_flight_across_reset_are_not_counted() {
        let monitor = ProcessingMonitor::default();
        let mut a = monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");
        let mut b = monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");
        let c_overdue = monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");

        monitor.reset_statistics();

        assert!(monitor.complete_monitoring(&mut a, true, None));
        assert!(monitor.complete_monitoring(&mut b, false, Some(&ProcessingError::new("boom", "h"))));
        assert!(monitor.record_timeout(&c_overdue, Duration::ZERO).is_none());
        let mut d = monitor.start_monitoring(&event(EventKind::OrderPlaced), "h");
        monitor.complete_monitoring(&mut d, true, None);

        let stats = monitor.get_statistics();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.timeout_count, 0);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.by_event_type["OrderPlaced"].total_count, 1);
        assert_eq!(monitor.get_all_health()["h"].failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_detects_overrun_within_one_interval() {
        let monitor = Arc::new(ProcessingMonitor::new(MonitorConfig {
            timeout: Duration::from_millis(250),
            sweep_interval: Duration::from_millis(100),
            ..MonitorConfig::default()
        }));
        let token = CancellationToken::new();
        let sweeper = monitor.spawn_timeout_sweeper(token.clone());

        monitor.start_monitoring(&event(EventKind::OrderShipped), "carrier-sync");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(monitor.get_statistics().timeout_count, 0);

        // overrun at 250ms, next sweep at 300ms
        tokio::time::sleep(Duration::from_millis(160)).await;
        assert_eq!(monitor.get_statistics().timeout_count, 1);
        assert_eq!(monitor.active_count(), 0);

        token.cancel();
        sweeper.await.unwrap();
    }
}
