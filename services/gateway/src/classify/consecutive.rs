//! Consecutive-violation tracking.
//!
//! A violation only becomes live after N back-to-back classifications with
//! the same reason. The counter is per `(series, reason)`: a physical-range
//! streak and an operational-range streak are independent, and any
//! intervening clean reading resets both.

use dashmap::DashMap;
use types::ClassifyReason;

#[derive(Debug, Clone, Copy)]
struct Streak {
    reason: ClassifyReason,
    count: u32,
}

/// In-memory per-series streak counter.
#[derive(Debug, Default)]
pub struct ConsecutiveTracker {
    streaks: DashMap<String, Streak>,
}

impl ConsecutiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violating classification; returns the streak length
    /// including this reading. A reason change restarts the streak at 1.
    pub fn record_violation(&self, series_id: &str, reason: ClassifyReason) -> u32 {
        let mut entry = self
            .streaks
            .entry(series_id.to_string())
            .or_insert(Streak { reason, count: 0 });
        if entry.reason == reason {
            entry.count += 1;
        } else {
            entry.reason = reason;
            entry.count = 1;
        }
        entry.count
    }

    /// A clean reading arrived; any streak for the series resets.
    pub fn record_normal(&self, series_id: &str) {
        self.streaks.remove(series_id);
    }

    pub fn current(&self, series_id: &str) -> u32 {
        self.streaks.get(series_id).map(|s| s.count).unwrap_or(0)
    }
}
