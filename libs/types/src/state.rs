//! Per-series operational state and the valid-transition table.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a series. A series never emits alerts, warnings, or
/// prediction publishes while `Initializing`; it only counts readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalState {
    Initializing,
    Normal,
    Warning,
    Alert,
    Stale,
}

impl OperationalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalState::Initializing => "INITIALIZING",
            OperationalState::Normal => "NORMAL",
            OperationalState::Warning => "WARNING",
            OperationalState::Alert => "ALERT",
            OperationalState::Stale => "STALE",
        }
    }

    /// Parse the stored column form produced by [`Self::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALIZING" => Some(OperationalState::Initializing),
            "NORMAL" => Some(OperationalState::Normal),
            "WARNING" => Some(OperationalState::Warning),
            "ALERT" => Some(OperationalState::Alert),
            "STALE" => Some(OperationalState::Stale),
            _ => None,
        }
    }

    /// True when the series may generate alert/warning events.
    pub fn can_generate_events(&self) -> bool {
        matches!(
            self,
            OperationalState::Normal | OperationalState::Warning | OperationalState::Alert
        )
    }
}

/// Transition table. Same-state is always allowed (no-op); everything else
/// must be listed here.
pub fn is_valid_transition(from: OperationalState, to: OperationalState) -> bool {
    use OperationalState::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Initializing, Normal)
            | (Initializing, Stale)
            | (Normal, Warning)
            | (Normal, Alert)
            | (Normal, Stale)
            | (Warning, Normal)
            | (Warning, Alert)
            | (Warning, Stale)
            | (Alert, Normal)
            | (Alert, Stale)
            | (Stale, Initializing)
    )
}

/// Persisted per-series state. Written through on every transition so reads
/// observe writes monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesState {
    pub series_id: String,
    pub state: OperationalState,
    pub valid_readings_count: u64,
    pub min_readings_for_normal: u32,
    /// Instant of the last state change, seconds since epoch.
    pub state_changed_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<f64>,
}

impl SeriesState {
    /// Fresh series: warming up, nothing counted yet.
    pub fn new(series_id: impl Into<String>, min_readings_for_normal: u32, now: f64) -> Self {
        Self {
            series_id: series_id.into(),
            state: OperationalState::Initializing,
            valid_readings_count: 0,
            min_readings_for_normal,
            state_changed_at: now,
            last_value: None,
            last_timestamp: None,
        }
    }

    pub fn is_warming_up(&self) -> bool {
        self.state == OperationalState::Initializing
    }

    /// Readings still needed before the series can reach `Normal`.
    pub fn readings_until_normal(&self) -> u64 {
        if self.state != OperationalState::Initializing {
            return 0;
        }
        u64::from(self.min_readings_for_normal).saturating_sub(self.valid_readings_count)
    }
}
