//! Legacy relational backend (IoT schema).
//!
//! The legacy schema owns threshold evaluation: inserting a reading runs a
//! stored procedure that persists the point, evaluates warning and critical
//! thresholds, manages alert records and writes notifications in one
//! transaction. The gateway therefore passes the classification through as
//! informational metadata only, and the record-level operations on this
//! backend are deliberate no-ops.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use types::{
    BandLimits, DataPoint, Domain, OperationalState, RateOfChangeLimits, SeriesState,
    StreamConfig, UnifiedReading, ValueConstraints,
};

use crate::error::{GatewayError, Result};

use super::{BackendHealth, NotificationRecord, SeriesStore, Severity, StoredAlert, WarningEvent};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct LegacySqlStore {
    pool: PgPool,
}

impl LegacySqlStore {
    /// Lazy pool: nothing connects until the first query, so the gateway
    /// boots even while the database is still coming up.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(url)
            .map_err(|e| GatewayError::unavailable("legacy", e.to_string()))?;
        Ok(Self { pool })
    }

    fn sensor_id(&self, point: &DataPoint) -> Result<i64> {
        point.legacy_sensor_id().ok_or_else(|| {
            GatewayError::internal(format!(
                "legacy point without numeric sensor id: {}",
                point.series_id
            ))
        })
    }
}

#[async_trait]
impl SeriesStore for LegacySqlStore {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn insert_point(&self, reading: &UnifiedReading) -> Result<()> {
        let sensor_id = self.sensor_id(&reading.point)?;
        // Single transactional call: insert + threshold evaluation + alert
        // and notification management all happen inside the procedure.
        sqlx::query("SELECT sp_insert_reading_and_check_thresholds($1, $2, $3, $4)")
            .bind(sensor_id)
            .bind(reading.point.value)
            .bind(reading.point.timestamp)
            .bind(serde_json::json!({
                "classification": reading.classification.as_str(),
                "reason": reading.reason.as_str(),
            }))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_latest(&self, point: &DataPoint) -> Result<()> {
        let sensor_id = self.sensor_id(point)?;
        sqlx::query(
            "INSERT INTO sensor_readings_latest (sensor_id, latest_value, latest_timestamp) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (sensor_id) DO UPDATE \
             SET latest_value = EXCLUDED.latest_value, \
                 latest_timestamp = EXCLUDED.latest_timestamp",
        )
        .bind(sensor_id)
        .bind(point.value)
        .bind(point.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Alert and warning records are managed inside the stored procedure on
    // this backend; the pipeline-level calls are pass-throughs.

    async fn open_alert(&self, _alert: StoredAlert) -> Result<bool> {
        Ok(false)
    }

    async fn resolve_alert(&self, _series_id: &str, _at: f64, _reason: &str) -> Result<bool> {
        Ok(false)
    }

    async fn open_warning(&self, _event: WarningEvent) -> Result<bool> {
        Ok(false)
    }

    async fn resolve_warning(&self, _series_id: &str, _at: f64, _reason: &str) -> Result<bool> {
        Ok(false)
    }

    async fn active_alert(&self, series_id: &str) -> Result<Option<StoredAlert>> {
        let sensor_id: i64 = series_id
            .parse()
            .map_err(|_| GatewayError::internal(format!("non-numeric legacy series {series_id}")))?;
        let row = sqlx::query(
            "SELECT threshold_name, triggering_value, triggering_timestamp, \
                    opened_at, resolved_at, resolution_reason, is_active \
             FROM alerts WHERE sensor_id = $1 AND is_active LIMIT 1",
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StoredAlert {
            series_id: series_id.to_string(),
            severity: Severity::Critical,
            threshold_name: r.get("threshold_name"),
            triggering_value: r.get("triggering_value"),
            triggering_timestamp: r.get("triggering_timestamp"),
            opened_at: r.get("opened_at"),
            resolved_at: r.get("resolved_at"),
            resolution_reason: r.get("resolution_reason"),
            is_active: r.get("is_active"),
        }))
    }

    async fn active_warning(&self, series_id: &str) -> Result<Option<WarningEvent>> {
        let sensor_id: i64 = series_id
            .parse()
            .map_err(|_| GatewayError::internal(format!("non-numeric legacy series {series_id}")))?;
        let row = sqlx::query(
            "SELECT event_type, previous_value, value, absolute_delta, relative_delta, \
                    opened_at, resolved_at, resolution_reason, is_active \
             FROM warning_events WHERE sensor_id = $1 AND is_active LIMIT 1",
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let event_type: String = r.get("event_type");
            WarningEvent {
                series_id: series_id.to_string(),
                event_type: if event_type == "DELTA_SPIKE" {
                    super::WarningEventType::DeltaSpike
                } else {
                    super::WarningEventType::OperationalDeviation
                },
                previous_value: r.get("previous_value"),
                value: r.get("value"),
                absolute_delta: r.get("absolute_delta"),
                relative_delta: r.get("relative_delta"),
                opened_at: r.get("opened_at"),
                resolved_at: r.get("resolved_at"),
                resolution_reason: r.get("resolution_reason"),
                is_active: r.get("is_active"),
            }
        }))
    }

    async fn insert_notification(&self, _notification: &NotificationRecord) -> Result<()> {
        // Written by the stored procedure alongside the alert.
        Ok(())
    }

    /// Compose constraints from the legacy threshold tables: critical rows
    /// become the critical band, warning rows the operational band, and the
    /// delta-threshold table the rate-of-change limits.
    async fn load_config(&self, series_id: &str) -> Result<Option<StreamConfig>> {
        let sensor_id: i64 = match series_id.parse() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        let threshold_rows = sqlx::query(
            "SELECT severity, threshold_value_min, threshold_value_max, consecutive_readings \
             FROM alert_thresholds \
             WHERE sensor_id = $1 AND is_active AND condition_type = 'out_of_range' \
             ORDER BY CASE severity WHEN 'critical' THEN 0 ELSE 1 END, id",
        )
        .bind(sensor_id)
        .fetch_all(&self.pool)
        .await?;

        let delta_row = sqlx::query(
            "SELECT abs_delta, rel_delta, abs_slope, rel_slope \
             FROM delta_thresholds WHERE sensor_id = $1 AND is_active \
             ORDER BY id LIMIT 1",
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        if threshold_rows.is_empty() && delta_row.is_none() {
            return Ok(None);
        }

        let mut constraints = ValueConstraints::default();
        for row in &threshold_rows {
            let severity: String = row.get("severity");
            let band = BandLimits::new(
                row.get::<Option<f64>, _>("threshold_value_min"),
                row.get::<Option<f64>, _>("threshold_value_max"),
            );
            match severity.as_str() {
                "critical" if constraints.critical.is_unbounded() => constraints.critical = band,
                "warning" if constraints.operational.is_unbounded() => {
                    constraints.operational = band
                }
                _ => {}
            }
            if let Some(n) = row.get::<Option<i32>, _>("consecutive_readings") {
                if n > 0 {
                    constraints.consecutive_violations_required = n as u32;
                }
            }
        }
        if let Some(row) = delta_row {
            constraints.rate_of_change = RateOfChangeLimits {
                abs_delta: row.get("abs_delta"),
                rel_delta: row.get("rel_delta"),
                abs_slope: row.get("abs_slope"),
                rel_slope: row.get("rel_slope"),
                ..RateOfChangeLimits::default()
            };
        }

        Ok(Some(StreamConfig {
            series_id: series_id.to_string(),
            domain: Domain::Iot,
            display_name: None,
            alerting_enabled: true,
            prediction_enabled: true,
            constraints,
        }))
    }

    async fn load_state(&self, series_id: &str) -> Result<Option<SeriesState>> {
        let sensor_id: i64 = match series_id.parse() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        let row = sqlx::query(
            "SELECT operational_state, valid_readings_count, min_readings_for_normal, \
                    state_changed_at, last_value, last_timestamp \
             FROM sensor_state WHERE sensor_id = $1",
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| {
            let state_str: String = r.get("operational_state");
            let state = OperationalState::parse(&state_str)?;
            Some(SeriesState {
                series_id: series_id.to_string(),
                state,
                valid_readings_count: r.get::<i64, _>("valid_readings_count") as u64,
                min_readings_for_normal: r.get::<i32, _>("min_readings_for_normal") as u32,
                state_changed_at: r.get("state_changed_at"),
                last_value: r.get("last_value"),
                last_timestamp: r.get("last_timestamp"),
            })
        }))
    }

    async fn store_state(&self, state: &SeriesState) -> Result<()> {
        let sensor_id: i64 = state.series_id.parse().map_err(|_| {
            GatewayError::internal(format!("non-numeric legacy series {}", state.series_id))
        })?;
        sqlx::query(
            "INSERT INTO sensor_state \
                 (sensor_id, operational_state, valid_readings_count, \
                  min_readings_for_normal, state_changed_at, last_value, last_timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (sensor_id) DO UPDATE SET \
                 operational_state = EXCLUDED.operational_state, \
                 valid_readings_count = EXCLUDED.valid_readings_count, \
                 min_readings_for_normal = EXCLUDED.min_readings_for_normal, \
                 state_changed_at = EXCLUDED.state_changed_at, \
                 last_value = EXCLUDED.last_value, \
                 last_timestamp = EXCLUDED.last_timestamp",
        )
        .bind(sensor_id)
        .bind(state.state.as_str())
        .bind(state.valid_readings_count as i64)
        .bind(state.min_readings_for_normal as i32)
        .bind(state.state_changed_at)
        .bind(state.last_value)
        .bind(state.last_timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_sensor(&self, device_uuid: &str, sensor_uuid: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT s.id FROM sensors s \
             JOIN devices d ON s.device_id = d.id \
             WHERE d.uuid = $1 AND s.uuid = $2",
        )
        .bind(device_uuid)
        .bind(sensor_uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn health(&self) -> BackendHealth {
        match tokio::time::timeout(HEALTH_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
        {
            Ok(Ok(_)) => BackendHealth::ok(),
            Ok(Err(e)) => BackendHealth::down(e.to_string()),
            Err(_) => BackendHealth::down("health probe timed out"),
        }
    }
}
