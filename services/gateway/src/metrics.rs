//! Gateway-wide counters.
//!
//! One shared instance, atomics only, snapshot on demand for the stats and
//! resilience-health endpoints.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters recorded across the router, resilience layer, and bus.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub points_received: AtomicU64,
    pub points_accepted: AtomicU64,
    pub points_rejected: AtomicU64,
    pub dedup_hits: AtomicU64,
    pub suspicious_zeros: AtomicU64,
    pub dlq_written: AtomicU64,
    pub dlq_dropped_oldest: AtomicU64,
    pub persist_failures: AtomicU64,
    pub bus_published: AtomicU64,
    pub bus_throttled: AtomicU64,
    pub bus_publish_failures: AtomicU64,
    pub state_transitions: AtomicU64,
    pub alerts_opened: AtomicU64,
    pub alerts_superseded: AtomicU64,
    pub warnings_opened: AtomicU64,
    pub internal_errors: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            points_received: self.points_received.load(Ordering::Relaxed),
            points_accepted: self.points_accepted.load(Ordering::Relaxed),
            points_rejected: self.points_rejected.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            suspicious_zeros: self.suspicious_zeros.load(Ordering::Relaxed),
            dlq_written: self.dlq_written.load(Ordering::Relaxed),
            dlq_dropped_oldest: self.dlq_dropped_oldest.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            bus_published: self.bus_published.load(Ordering::Relaxed),
            bus_throttled: self.bus_throttled.load(Ordering::Relaxed),
            bus_publish_failures: self.bus_publish_failures.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            alerts_opened: self.alerts_opened.load(Ordering::Relaxed),
            alerts_superseded: self.alerts_superseded.load(Ordering::Relaxed),
            warnings_opened: self.warnings_opened.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every counter, serializable for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub points_received: u64,
    pub points_accepted: u64,
    pub points_rejected: u64,
    pub dedup_hits: u64,
    pub suspicious_zeros: u64,
    pub dlq_written: u64,
    pub dlq_dropped_oldest: u64,
    pub persist_failures: u64,
    pub bus_published: u64,
    pub bus_throttled: u64,
    pub bus_publish_failures: u64,
    pub state_transitions: u64,
    pub alerts_opened: u64,
    pub alerts_superseded: u64,
    pub warnings_opened: u64,
    pub internal_errors: u64,
}
