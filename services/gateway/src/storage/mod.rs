//! Storage contracts and stored record shapes.
//!
//! Persistence sits behind one async trait so the pipelines stay backend
//! agnostic. The legacy relational backend and the generic time-series
//! backend both implement [`SeriesStore`]; the [`router`] dispatches on the
//! point's domain and never crosses backends.

pub mod generic;
pub mod legacy;
pub mod memory;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use types::{DataPoint, SeriesState, StreamConfig, UnifiedReading};

use crate::error::Result;

pub use router::DomainStorageRouter;

/// Severity carried on stored alert records. Alerts opened by the alert
/// sub-pipeline are always `Critical` and are never downgraded in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// An alert record. At most one is active per series at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAlert {
    pub series_id: String,
    pub severity: Severity,
    /// Name of the violated threshold, e.g. `physical_range`.
    pub threshold_name: String,
    pub triggering_value: f64,
    pub triggering_timestamp: f64,
    pub opened_at: f64,
    pub resolved_at: Option<f64>,
    pub resolution_reason: Option<String>,
    pub is_active: bool,
}

/// Event type carried on warning records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningEventType {
    DeltaSpike,
    OperationalDeviation,
}

/// A warning record (delta spike or operational deviation). At most one is
/// active per series at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningEvent {
    pub series_id: String,
    pub event_type: WarningEventType,
    pub previous_value: Option<f64>,
    pub value: f64,
    pub absolute_delta: Option<f64>,
    pub relative_delta: Option<f64>,
    pub opened_at: f64,
    pub resolved_at: Option<f64>,
    pub resolution_reason: Option<String>,
    pub is_active: bool,
}

/// Notification emitted when an alert opens. Delivery is out of scope;
/// the record is the hand-off point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub series_id: String,
    pub severity: Severity,
    pub message: String,
    pub created_at: f64,
}

/// Health of one storage backend, reported independently of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BackendHealth {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            detail: None,
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            detail: Some(detail.into()),
        }
    }
}

/// Persistence operations one backend must support.
///
/// The legacy backend folds alert/threshold evaluation into its single
/// transactional insert; its record-level methods are accordingly no-ops
/// and the classification travels as informational metadata only.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Durably store the point (with its classification as metadata).
    async fn insert_point(&self, reading: &UnifiedReading) -> Result<()>;

    /// Upsert the per-series latest-value record.
    async fn upsert_latest(&self, point: &DataPoint) -> Result<()>;

    /// Open a new active alert, resolving any pre-existing active alert for
    /// the same series in the same step. Returns true when one was
    /// superseded.
    async fn open_alert(&self, alert: StoredAlert) -> Result<bool>;

    /// Resolve the active alert, if any. Returns true when one was resolved.
    async fn resolve_alert(&self, series_id: &str, at: f64, reason: &str) -> Result<bool>;

    /// Open a new active warning, resolving any pre-existing active warning
    /// for the same series. Returns true when one was superseded.
    async fn open_warning(&self, event: WarningEvent) -> Result<bool>;

    /// Resolve the active warning, if any. Returns true when one was
    /// resolved.
    async fn resolve_warning(&self, series_id: &str, at: f64, reason: &str) -> Result<bool>;

    async fn active_alert(&self, series_id: &str) -> Result<Option<StoredAlert>>;

    async fn active_warning(&self, series_id: &str) -> Result<Option<WarningEvent>>;

    async fn insert_notification(&self, notification: &NotificationRecord) -> Result<()>;

    /// Stored per-series configuration, `None` when the series has none.
    async fn load_config(&self, series_id: &str) -> Result<Option<StreamConfig>>;

    async fn load_state(&self, series_id: &str) -> Result<Option<SeriesState>>;

    /// Write-through state persistence: transition and counter in one call.
    async fn store_state(&self, state: &SeriesState) -> Result<()>;

    /// Legacy device membership: `(device_uuid, sensor_uuid) -> sensor_id`.
    /// Backends without device auth return `None`.
    async fn resolve_sensor(&self, _device_uuid: &str, _sensor_uuid: &str) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn health(&self) -> BackendHealth;
}
