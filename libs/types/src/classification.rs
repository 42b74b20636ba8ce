//! Classification results and the unified reading contract.
//!
//! The classifier is a pure decision: one [`Classification`] tag plus one
//! machine-readable [`ClassifyReason`]. The router wraps the point and its
//! verdict into a [`UnifiedReading`], which is the only input the
//! sub-pipelines accept.

use serde::{Deserialize, Serialize};

use crate::data_point::DataPoint;
use crate::state::OperationalState;

/// The five classes a point can land in. Exactly one per reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    WarningViolation,
    CriticalViolation,
    AnomalyDetected,
    Rejected,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::WarningViolation => "warning_violation",
            Classification::CriticalViolation => "critical_violation",
            Classification::AnomalyDetected => "anomaly_detected",
            Classification::Rejected => "rejected",
        }
    }
}

/// Machine-readable reason codes attached to every classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyReason {
    /// Value escaped the critical (hard physical) band.
    PhysicalRange,
    /// Value escaped the operational band.
    OperationalRange,
    /// Value sits between the warning bound and the operational bound.
    WarningZone,
    /// Rate-of-change threshold tripped against the previous neighbour.
    DeltaSpike,
    /// Series still warming up; original verdict suppressed.
    Warmup,
    /// Same-kind event suppressed inside the post-resolution window.
    Cooldown,
    /// Violation below the consecutive-readings requirement.
    Debounce,
    /// Alerting disabled on the stream configuration.
    AlertingDisabled,
    /// Clean point, nothing tripped.
    Clean,
    /// Guards rejected the point before classification.
    GuardsFailed,
}

impl ClassifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifyReason::PhysicalRange => "physical_range",
            ClassifyReason::OperationalRange => "operational_range",
            ClassifyReason::WarningZone => "warning_zone",
            ClassifyReason::DeltaSpike => "delta_spike",
            ClassifyReason::Warmup => "warmup",
            ClassifyReason::Cooldown => "cooldown",
            ClassifyReason::Debounce => "debounce",
            ClassifyReason::AlertingDisabled => "alerting_disabled",
            ClassifyReason::Clean => "clean",
            ClassifyReason::GuardsFailed => "guards_failed",
        }
    }
}

/// Which rate-of-change thresholds tripped for a spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaTrigger {
    AbsDelta,
    RelDelta,
    AbsSlope,
    RelSlope,
}

/// Computed deltas carried by an `AnomalyDetected` reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaInfo {
    pub prev_value: f64,
    pub absolute_delta: f64,
    pub relative_delta: f64,
    pub absolute_slope: f64,
    pub relative_slope: f64,
    pub elapsed_secs: f64,
    pub triggered: Vec<DeltaTrigger>,
}

/// The unified contract handed from the router to exactly one sub-pipeline:
/// the point, its verdict, and the context the verdict was made under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedReading {
    pub point: DataPoint,
    pub classification: Classification,
    pub reason: ClassifyReason,
    /// Human-readable explanation for logs and stored records.
    pub explanation: String,
    /// Deltas, present only for `DeltaSpike` readings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaInfo>,
    /// Operational state observed at classification time (pre-transition).
    pub state: OperationalState,
    /// Snapshot of the stream-config flag gating bus publication.
    pub prediction_enabled: bool,
}

impl UnifiedReading {
    pub fn series_id(&self) -> &str {
        &self.point.series_id
    }

    /// True when the reading may be published to the prediction bus:
    /// a normal reading from a live series with prediction enabled. A
    /// stale series re-enters warm-up on this very point, so it is just
    /// as unpublishable as one still initializing.
    pub fn publishable(&self) -> bool {
        self.classification == Classification::Normal
            && self.state.can_generate_events()
            && self.prediction_enabled
    }
}
