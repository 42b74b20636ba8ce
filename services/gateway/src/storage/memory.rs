//! In-memory store.
//!
//! Backs the integration tests and single-node development runs. Implements
//! the full contract honestly, including the one-active-record guarantee,
//! so invariant tests exercise the same code paths as production pipelines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use types::{DataPoint, SeriesState, StreamConfig, UnifiedReading};

use crate::error::{GatewayError, Result};

use super::{
    BackendHealth, NotificationRecord, SeriesStore, StoredAlert, WarningEvent,
};

#[derive(Default)]
struct Inner {
    points: Vec<UnifiedReading>,
    latest: HashMap<String, DataPoint>,
    alerts: HashMap<String, Vec<StoredAlert>>,
    warnings: HashMap<String, Vec<WarningEvent>>,
    notifications: Vec<NotificationRecord>,
    configs: HashMap<String, StreamConfig>,
    states: HashMap<String, SeriesState>,
    sensors: HashMap<(String, String), i64>,
}

/// Thread-safe in-memory implementation of [`SeriesStore`].
#[derive(Default)]
pub struct MemoryStore {
    name: &'static str,
    inner: Mutex<Inner>,
    /// Test hook: when set, every write fails as unavailable.
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail (circuit-breaker and DLQ tests).
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::unavailable(self.name, "injected failure"));
        }
        Ok(())
    }

    /// Seed a stored configuration for a series.
    pub fn put_config(&self, config: StreamConfig) {
        self.inner
            .lock()
            .configs
            .insert(config.series_id.clone(), config);
    }

    /// Seed a legacy device/sensor membership row.
    pub fn put_sensor(&self, device_uuid: &str, sensor_uuid: &str, sensor_id: i64) {
        self.inner
            .lock()
            .sensors
            .insert((device_uuid.to_string(), sensor_uuid.to_string()), sensor_id);
    }

    pub fn point_count(&self) -> usize {
        self.inner.lock().points.len()
    }

    pub fn points_for(&self, series_id: &str) -> Vec<UnifiedReading> {
        self.inner
            .lock()
            .points
            .iter()
            .filter(|r| r.point.series_id == series_id)
            .cloned()
            .collect()
    }

    pub fn all_alerts(&self, series_id: &str) -> Vec<StoredAlert> {
        self.inner
            .lock()
            .alerts
            .get(series_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_warnings(&self, series_id: &str) -> Vec<WarningEvent> {
        self.inner
            .lock()
            .warnings
            .get(series_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn notification_count(&self) -> usize {
        self.inner.lock().notifications.len()
    }

    pub fn latest_for(&self, series_id: &str) -> Option<DataPoint> {
        self.inner.lock().latest.get(series_id).cloned()
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn insert_point(&self, reading: &UnifiedReading) -> Result<()> {
        self.check_available()?;
        self.inner.lock().points.push(reading.clone());
        Ok(())
    }

    async fn upsert_latest(&self, point: &DataPoint) -> Result<()> {
        self.check_available()?;
        self.inner
            .lock()
            .latest
            .insert(point.series_id.clone(), point.clone());
        Ok(())
    }

    async fn open_alert(&self, alert: StoredAlert) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let list = inner.alerts.entry(alert.series_id.clone()).or_default();
        let mut superseded = false;
        for existing in list.iter_mut().filter(|a| a.is_active) {
            existing.is_active = false;
            existing.resolved_at = Some(alert.opened_at);
            existing.resolution_reason = Some("superseded".to_string());
            superseded = true;
        }
        list.push(alert);
        Ok(superseded)
    }

    async fn resolve_alert(&self, series_id: &str, at: f64, reason: &str) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let mut resolved = false;
        if let Some(list) = inner.alerts.get_mut(series_id) {
            for existing in list.iter_mut().filter(|a| a.is_active) {
                existing.is_active = false;
                existing.resolved_at = Some(at);
                existing.resolution_reason = Some(reason.to_string());
                resolved = true;
            }
        }
        Ok(resolved)
    }

    async fn open_warning(&self, event: WarningEvent) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let list = inner.warnings.entry(event.series_id.clone()).or_default();
        let mut superseded = false;
        for existing in list.iter_mut().filter(|w| w.is_active) {
            existing.is_active = false;
            existing.resolved_at = Some(event.opened_at);
            existing.resolution_reason = Some("superseded".to_string());
            superseded = true;
        }
        list.push(event);
        Ok(superseded)
    }

    async fn resolve_warning(&self, series_id: &str, at: f64, reason: &str) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let mut resolved = false;
        if let Some(list) = inner.warnings.get_mut(series_id) {
            for existing in list.iter_mut().filter(|w| w.is_active) {
                existing.is_active = false;
                existing.resolved_at = Some(at);
                existing.resolution_reason = Some(reason.to_string());
                resolved = true;
            }
        }
        Ok(resolved)
    }

    async fn active_alert(&self, series_id: &str) -> Result<Option<StoredAlert>> {
        Ok(self
            .inner
            .lock()
            .alerts
            .get(series_id)
            .and_then(|list| list.iter().find(|a| a.is_active).cloned()))
    }

    async fn active_warning(&self, series_id: &str) -> Result<Option<WarningEvent>> {
        Ok(self
            .inner
            .lock()
            .warnings
            .get(series_id)
            .and_then(|list| list.iter().find(|w| w.is_active).cloned()))
    }

    async fn insert_notification(&self, notification: &NotificationRecord) -> Result<()> {
        self.check_available()?;
        self.inner.lock().notifications.push(notification.clone());
        Ok(())
    }

    async fn load_config(&self, series_id: &str) -> Result<Option<StreamConfig>> {
        Ok(self.inner.lock().configs.get(series_id).cloned())
    }

    async fn load_state(&self, series_id: &str) -> Result<Option<SeriesState>> {
        Ok(self.inner.lock().states.get(series_id).cloned())
    }

    async fn store_state(&self, state: &SeriesState) -> Result<()> {
        self.check_available()?;
        self.inner
            .lock()
            .states
            .insert(state.series_id.clone(), state.clone());
        Ok(())
    }

    async fn resolve_sensor(&self, device_uuid: &str, sensor_uuid: &str) -> Result<Option<i64>> {
        Ok(self
            .inner
            .lock()
            .sensors
            .get(&(device_uuid.to_string(), sensor_uuid.to_string()))
            .copied())
    }

    async fn health(&self) -> BackendHealth {
        if self.fail_writes.load(Ordering::SeqCst) {
            BackendHealth::down("injected failure")
        } else {
            BackendHealth::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Severity;

    fn alert(series: &str, opened_at: f64) -> StoredAlert {
        StoredAlert {
            series_id: series.to_string(),
            severity: Severity::Critical,
            threshold_name: "physical_range".to_string(),
            triggering_value: 120.0,
            triggering_timestamp: opened_at,
            opened_at,
            resolved_at: None,
            resolution_reason: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn open_alert_supersedes_previous() {
        let store = MemoryStore::new("mem");
        assert!(!store.open_alert(alert("s", 10.0)).await.unwrap());
        assert!(store.open_alert(alert("s", 11.0)).await.unwrap());

        let all = store.all_alerts("s");
        assert_eq!(all.len(), 2);
        let active: Vec<_> = all.iter().filter(|a| a.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].opened_at, 11.0);
        let resolved = all.iter().find(|a| !a.is_active).unwrap();
        assert_eq!(resolved.resolution_reason.as_deref(), Some("superseded"));
        assert_eq!(resolved.resolved_at, Some(11.0));
    }

    #[tokio::test]
    async fn failure_injection_rejects_writes() {
        let store = MemoryStore::new("mem");
        store.set_failing(true);
        let err = store.open_alert(alert("s", 1.0)).await.unwrap_err();
        assert!(err.is_transient());
        store.set_failing(false);
        assert!(store.open_alert(alert("s", 2.0)).await.is_ok());
    }
}
