//! Operational state machine.
//!
//! Decides the post-ingest state for a series given its current state and
//! the final classification. The decision is pure; the router persists the
//! transition write-through under the per-series lock. A periodic sweeper
//! moves quiet series to STALE.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use types::{is_valid_transition, Classification, OperationalState, SeriesState, UnifiedReading};

use crate::repository::SeriesRepository;
use crate::time::now_epoch;

/// Compute the state a series should hold after this reading.
///
/// `count_after` is the valid-readings count including this point.
/// `resolved_all` reports whether the sub-pipeline left the series with no
/// active alert or warning (the precondition for recovery to NORMAL).
///
/// Returns `None` when the series stays where it is.
pub fn next_state(
    current: &SeriesState,
    reading: &UnifiedReading,
    count_after: u64,
    resolved_all: bool,
) -> Option<OperationalState> {
    use OperationalState::*;

    let proposed = match current.state {
        // Any valid point revives a stale series into warm-up; the warm-up
        // completion check runs on the next point.
        Stale => Some(Initializing),
        Initializing => {
            if count_after >= u64::from(current.min_readings_for_normal) {
                Some(Normal)
            } else {
                None
            }
        }
        Normal | Warning | Alert => match reading.classification {
            Classification::CriticalViolation => Some(Alert),
            Classification::WarningViolation | Classification::AnomalyDetected => {
                // WARNING never downgrades an ALERT.
                if current.state == Alert {
                    None
                } else {
                    Some(Warning)
                }
            }
            Classification::Normal => {
                if current.state != Normal && resolved_all {
                    Some(Normal)
                } else {
                    None
                }
            }
            Classification::Rejected => None,
        },
    };

    match proposed {
        Some(to) if to != current.state => {
            if is_valid_transition(current.state, to) {
                Some(to)
            } else {
                // The table is the contract; a proposal outside it means a
                // logic bug upstream, not a state to persist.
                warn!(
                    series_id = %current.series_id,
                    from = current.state.as_str(),
                    to = to.as_str(),
                    "refusing invalid state transition"
                );
                None
            }
        }
        _ => None,
    }
}

/// Periodic task that sweeps quiet series to STALE.
///
/// Runs against the write-through state cache: every live series is there
/// because the router updates it on each point, so a scan of the cache
/// covers everything that could go stale.
pub struct StaleSweeper {
    repo: Arc<SeriesRepository>,
    stale_timeout: Duration,
    sweep_interval: Duration,
}

impl StaleSweeper {
    pub fn new(repo: Arc<SeriesRepository>, stale_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            repo,
            stale_timeout,
            sweep_interval,
        }
    }

    /// Run forever; spawn on the runtime at startup.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            timeout_secs = self.stale_timeout.as_secs(),
            "stale sweeper started"
        );
        loop {
            ticker.tick().await;
            self.sweep_once(now_epoch()).await;
        }
    }

    /// One pass; factored out so tests can drive it with a fixed clock.
    pub async fn sweep_once(&self, now: f64) {
        let cutoff = now - self.stale_timeout.as_secs_f64();
        for mut state in self.repo.cached_states() {
            if state.state == OperationalState::Stale {
                continue;
            }
            let last_seen = state.last_timestamp.unwrap_or(state.state_changed_at);
            if last_seen >= cutoff {
                continue;
            }
            if !is_valid_transition(state.state, OperationalState::Stale) {
                continue;
            }
            let from = state.state;
            state.state = OperationalState::Stale;
            state.state_changed_at = now;
            match self.repo.update_state(state.clone()).await {
                Ok(()) => debug!(
                    series_id = %state.series_id,
                    from = from.as_str(),
                    "series swept to STALE"
                ),
                Err(e) => warn!(
                    series_id = %state.series_id,
                    error = %e,
                    "failed to persist STALE transition"
                ),
            }
        }
    }
}
