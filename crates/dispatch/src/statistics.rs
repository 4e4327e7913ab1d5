//! Running statistics and health snapshots produced by the monitor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// `count / total`, or `0.0` when nothing was processed.
pub(crate) fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Per-event-type running aggregate.
///
/// Every field is an atomic so concurrent completions never contend on a
/// shared lock.
#[derive(Debug)]
pub struct EventTypeStatistics {
    total_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_processing_time_ms: AtomicU64,
    min_processing_time_ms: AtomicU64,
    max_processing_time_ms: AtomicU64,
}

impl Default for EventTypeStatistics {
    fn default() -> Self {
        Self {
            total_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_processing_time_ms: AtomicU64::new(0),
            min_processing_time_ms: AtomicU64::new(u64::MAX),
            max_processing_time_ms: AtomicU64::new(0),
        }
    }
}

impl EventTypeStatistics {
    /// Folds one finished invocation into the aggregate.
    pub fn record(&self, duration_ms: u64, success: bool) {
        self.total_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_time_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.min_processing_time_ms
            .fetch_min(duration_ms, Ordering::Relaxed);
        self.max_processing_time_ms
            .fetch_max(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventTypeSnapshot {
        let total_count = self.total_count.load(Ordering::Relaxed);
        let total_processing_time_ms = self.total_processing_time_ms.load(Ordering::Relaxed);
        let min = self.min_processing_time_ms.load(Ordering::Relaxed);
        EventTypeSnapshot {
            total_count,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            total_processing_time_ms,
            min_processing_time_ms: if min == u64::MAX { 0 } else { min },
            max_processing_time_ms: self.max_processing_time_ms.load(Ordering::Relaxed),
            average_processing_time_ms: rate(total_processing_time_ms, total_count),
        }
    }
}

/// Point-in-time copy of one event type's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTypeSnapshot {
    pub total_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_processing_time_ms: u64,
    pub min_processing_time_ms: u64,
    pub max_processing_time_ms: u64,
    pub average_processing_time_ms: f64,
}

/// Point-in-time copy of the monitor's counters.
///
/// Rates are relative to `total_processed`, which counts every started
/// invocation. Timeouts are counted separately from failures here, while
/// the per-type aggregates fold them in as failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStatistics {
    pub total_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub active_count: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub timeout_rate: f64,
    pub by_event_type: BTreeMap<String, EventTypeSnapshot>,
}

/// Health classification of one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Mutable per-handler record kept by the monitor.
#[derive(Debug, Default)]
pub(crate) struct HandlerHealthState {
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HandlerHealthState {
    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.last_success_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self, error: Option<String>) {
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.last_failure_at = Some(Utc::now());
        self.last_error = error;
    }

    pub fn record_timeout(&mut self, message: String) {
        self.timeout_count += 1;
        self.consecutive_failures += 1;
        self.last_failure_at = Some(Utc::now());
        self.last_error = Some(message);
    }

    pub fn snapshot(&self, handler_name: &str, degraded_after: u32, unhealthy_after: u32) -> HandlerHealth {
        let status = if self.consecutive_failures >= unhealthy_after {
            HealthStatus::Unhealthy
        } else if self.consecutive_failures >= degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        HandlerHealth {
            handler_name: handler_name.to_string(),
            status,
            success_count: self.success_count,
            failure_count: self.failure_count,
            timeout_count: self.timeout_count,
            consecutive_failures: self.consecutive_failures,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time health of one handler or subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerHealth {
    pub handler_name: String,
    pub status: HealthStatus,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
