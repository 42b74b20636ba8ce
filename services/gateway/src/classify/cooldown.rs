//! Post-resolution cooldown tracking.
//!
//! After an active alert or warning resolves because values recovered, a
//! new event of the same kind is suppressed for the configured window.
//! Supersede resolutions do not start a cooldown; only recoveries do.

use dashmap::DashMap;

/// The two kinds of stored records a cooldown applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Alert,
    Warning,
}

/// Per `(series, kind)` map of the last recovery-resolution instant,
/// seconds since epoch.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    resolved_at: DashMap<(String, RecordKind), f64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an active record of `kind` resolved at `now`.
    pub fn note_resolved(&self, series_id: &str, kind: RecordKind, now: f64) {
        self.resolved_at.insert((series_id.to_string(), kind), now);
    }

    /// True while a new record of `kind` is still suppressed.
    pub fn in_cooldown(&self, series_id: &str, kind: RecordKind, now: f64, window_secs: f64) -> bool {
        if window_secs <= 0.0 {
            return false;
        }
        self.resolved_at
            .get(&(series_id.to_string(), kind))
            .map(|at| now - *at < window_secs)
            .unwrap_or(false)
    }
}
