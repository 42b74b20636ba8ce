//! Generic time-series backend.
//!
//! Plain table-per-concern schema for every non-IoT domain: data points,
//! latest values, stream configs, series state, alert and warning records.
//! Unlike the legacy backend, record management lives here in the gateway,
//! so supersede/resolve semantics are explicit transactions.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use types::{DataPoint, Domain, OperationalState, SeriesState, StreamConfig, UnifiedReading};

use crate::error::{GatewayError, Result};

use super::{
    BackendHealth, NotificationRecord, SeriesStore, Severity, StoredAlert, WarningEvent,
    WarningEventType,
};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct GenericSqlStore {
    pool: PgPool,
}

impl GenericSqlStore {
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(url)
            .map_err(|e| GatewayError::unavailable("generic", e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SeriesStore for GenericSqlStore {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn insert_point(&self, reading: &UnifiedReading) -> Result<()> {
        let point = &reading.point;
        sqlx::query(
            "INSERT INTO data_points \
                 (series_id, domain, value, ts, ingested_at, sequence, \
                  classification, reason, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&point.series_id)
        .bind(point.domain.as_str())
        .bind(point.value)
        .bind(point.timestamp)
        .bind(point.ingested_at)
        .bind(point.sequence.map(|s| s as i64))
        .bind(reading.classification.as_str())
        .bind(reading.reason.as_str())
        .bind(serde_json::to_value(&point.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_latest(&self, point: &DataPoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO latest_values (series_id, value, ts) VALUES ($1, $2, $3) \
             ON CONFLICT (series_id) DO UPDATE \
             SET value = EXCLUDED.value, ts = EXCLUDED.ts",
        )
        .bind(&point.series_id)
        .bind(point.value)
        .bind(point.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_alert(&self, alert: StoredAlert) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let superseded = sqlx::query(
            "UPDATE alerts SET is_active = FALSE, resolved_at = $2, \
                    resolution_reason = 'superseded' \
             WHERE series_id = $1 AND is_active",
        )
        .bind(&alert.series_id)
        .bind(alert.opened_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "INSERT INTO alerts \
                 (series_id, severity, threshold_name, triggering_value, \
                  triggering_timestamp, opened_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE)",
        )
        .bind(&alert.series_id)
        .bind(match alert.severity {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
        })
        .bind(&alert.threshold_name)
        .bind(alert.triggering_value)
        .bind(alert.triggering_timestamp)
        .bind(alert.opened_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(superseded > 0)
    }

    async fn resolve_alert(&self, series_id: &str, at: f64, reason: &str) -> Result<bool> {
        let resolved = sqlx::query(
            "UPDATE alerts SET is_active = FALSE, resolved_at = $2, resolution_reason = $3 \
             WHERE series_id = $1 AND is_active",
        )
        .bind(series_id)
        .bind(at)
        .bind(reason)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(resolved > 0)
    }

    async fn open_warning(&self, event: WarningEvent) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let superseded = sqlx::query(
            "UPDATE warning_events SET is_active = FALSE, resolved_at = $2, \
                    resolution_reason = 'superseded' \
             WHERE series_id = $1 AND is_active",
        )
        .bind(&event.series_id)
        .bind(event.opened_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "INSERT INTO warning_events \
                 (series_id, event_type, previous_value, value, absolute_delta, \
                  relative_delta, opened_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)",
        )
        .bind(&event.series_id)
        .bind(match event.event_type {
            WarningEventType::DeltaSpike => "DELTA_SPIKE",
            WarningEventType::OperationalDeviation => "OPERATIONAL_DEVIATION",
        })
        .bind(event.previous_value)
        .bind(event.value)
        .bind(event.absolute_delta)
        .bind(event.relative_delta)
        .bind(event.opened_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(superseded > 0)
    }

    async fn resolve_warning(&self, series_id: &str, at: f64, reason: &str) -> Result<bool> {
        let resolved = sqlx::query(
            "UPDATE warning_events SET is_active = FALSE, resolved_at = $2, \
                    resolution_reason = $3 \
             WHERE series_id = $1 AND is_active",
        )
        .bind(series_id)
        .bind(at)
        .bind(reason)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(resolved > 0)
    }

    async fn active_alert(&self, series_id: &str) -> Result<Option<StoredAlert>> {
        let row = sqlx::query(
            "SELECT severity, threshold_name, triggering_value, triggering_timestamp, \
                    opened_at, resolved_at, resolution_reason, is_active \
             FROM alerts WHERE series_id = $1 AND is_active LIMIT 1",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let severity: String = r.get("severity");
            StoredAlert {
                series_id: series_id.to_string(),
                severity: if severity == "critical" {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
                threshold_name: r.get("threshold_name"),
                triggering_value: r.get("triggering_value"),
                triggering_timestamp: r.get("triggering_timestamp"),
                opened_at: r.get("opened_at"),
                resolved_at: r.get("resolved_at"),
                resolution_reason: r.get("resolution_reason"),
                is_active: r.get("is_active"),
            }
        }))
    }

    async fn active_warning(&self, series_id: &str) -> Result<Option<WarningEvent>> {
        let row = sqlx::query(
            "SELECT event_type, previous_value, value, absolute_delta, relative_delta, \
                    opened_at, resolved_at, resolution_reason, is_active \
             FROM warning_events WHERE series_id = $1 AND is_active LIMIT 1",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let event_type: String = r.get("event_type");
            WarningEvent {
                series_id: series_id.to_string(),
                event_type: if event_type == "DELTA_SPIKE" {
                    WarningEventType::DeltaSpike
                } else {
                    WarningEventType::OperationalDeviation
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

    async fn insert_notification(&self, notification: &NotificationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (series_id, severity, message, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&notification.series_id)
        .bind(match notification.severity {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
        })
        .bind(&notification.message)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_config(&self, series_id: &str) -> Result<Option<StreamConfig>> {
        let row = sqlx::query(
            "SELECT domain, display_name, alerting_enabled, prediction_enabled, constraints \
             FROM stream_configs WHERE series_id = $1",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let domain_str: String = row.get("domain");
        let domain = Domain::parse(&domain_str).unwrap_or(Domain::Generic);
        let constraints: serde_json::Value = row.get("constraints");
        Ok(Some(StreamConfig {
            series_id: series_id.to_string(),
            domain,
            display_name: row.get("display_name"),
            alerting_enabled: row.get("alerting_enabled"),
            prediction_enabled: row.get("prediction_enabled"),
            constraints: serde_json::from_value(constraints)?,
        }))
    }

    async fn load_state(&self, series_id: &str) -> Result<Option<SeriesState>> {
        let row = sqlx::query(
            "SELECT operational_state, valid_readings_count, min_readings_for_normal, \
                    state_changed_at, last_value, last_timestamp \
             FROM series_states WHERE series_id = $1",
        )
        .bind(series_id)
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
        sqlx::query(
            "INSERT INTO series_states \
                 (series_id, operational_state, valid_readings_count, \
                  min_readings_for_normal, state_changed_at, last_value, last_timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (series_id) DO UPDATE SET \
                 operational_state = EXCLUDED.operational_state, \
                 valid_readings_count = EXCLUDED.valid_readings_count, \
                 min_readings_for_normal = EXCLUDED.min_readings_for_normal, \
                 state_changed_at = EXCLUDED.state_changed_at, \
                 last_value = EXCLUDED.last_value, \
                 last_timestamp = EXCLUDED.last_timestamp",
        )
        .bind(&state.series_id)
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
