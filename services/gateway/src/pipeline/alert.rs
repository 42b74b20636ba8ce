//! Alert sub-pipeline.
//!
//! Owns critical violations of the physical range, and nothing else.
//! Persists the triggering point, supersedes any active alert for the
//! series, opens a new critical alert, and records a notification. Never
//! touches the prediction bus.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use types::{Classification, ClassifyReason, UnifiedReading};

use crate::error::Result;
use crate::metrics::GatewayMetrics;
use crate::storage::{DomainStorageRouter, NotificationRecord, Severity, StoredAlert};

use super::{reject_foreign, PipelineOutcome, SubPipeline};

pub struct AlertPipeline {
    storage: Arc<DomainStorageRouter>,
    metrics: Arc<GatewayMetrics>,
}

impl AlertPipeline {
    pub fn new(storage: Arc<DomainStorageRouter>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { storage, metrics }
    }
}

#[async_trait]
impl SubPipeline for AlertPipeline {
    fn name(&self) -> &'static str {
        "alert"
    }

    fn accepts(&self, reading: &UnifiedReading) -> bool {
        reading.classification == Classification::CriticalViolation
            && reading.reason == ClassifyReason::PhysicalRange
    }

    async fn ingest(&self, reading: &UnifiedReading) -> Result<PipelineOutcome> {
        reject_foreign(self, reading)?;
        let point = &reading.point;
        let backend = self.storage.for_domain(point.domain);

        backend.insert_point(reading).await?;

        // Severity is pinned to critical here and the store never rewrites
        // an existing record's severity: a critical alert cannot be
        // downgraded by anything that happens later.
        let superseded = backend
            .open_alert(StoredAlert {
                series_id: point.series_id.clone(),
                severity: Severity::Critical,
                threshold_name: reading.reason.as_str().to_string(),
                triggering_value: point.value,
                triggering_timestamp: point.timestamp,
                opened_at: point.timestamp,
                resolved_at: None,
                resolution_reason: None,
                is_active: true,
            })
            .await?;

        backend
            .insert_notification(&NotificationRecord {
                series_id: point.series_id.clone(),
                severity: Severity::Critical,
                message: reading.explanation.clone(),
                created_at: point.timestamp,
            })
            .await?;

        GatewayMetrics::incr(&self.metrics.alerts_opened);
        if superseded {
            GatewayMetrics::incr(&self.metrics.alerts_superseded);
        }
        info!(
            series_id = %point.series_id,
            value = point.value,
            superseded,
            "critical alert opened"
        );

        Ok(PipelineOutcome {
            persisted: true,
            published: false,
            resolved_all: false,
            superseded,
        })
    }
}
