//! Warning sub-pipeline.
//!
//! Owns delta spikes and operational-band violations. Persists the point
//! and an event record carrying the computed deltas, superseding any active
//! warning for the series. Never touches the prediction bus.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use types::{Classification, ClassifyReason, UnifiedReading};

use crate::error::Result;
use crate::metrics::GatewayMetrics;
use crate::storage::{DomainStorageRouter, WarningEvent, WarningEventType};

use super::{reject_foreign, PipelineOutcome, SubPipeline};

pub struct WarningPipeline {
    storage: Arc<DomainStorageRouter>,
    metrics: Arc<GatewayMetrics>,
}

impl WarningPipeline {
    pub fn new(storage: Arc<DomainStorageRouter>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { storage, metrics }
    }
}

#[async_trait]
impl SubPipeline for WarningPipeline {
    fn name(&self) -> &'static str {
        "warning"
    }

    fn accepts(&self, reading: &UnifiedReading) -> bool {
        match reading.classification {
            Classification::AnomalyDetected => reading.reason == ClassifyReason::DeltaSpike,
            Classification::WarningViolation => matches!(
                reading.reason,
                ClassifyReason::OperationalRange | ClassifyReason::WarningZone
            ),
            _ => false,
        }
    }

    async fn ingest(&self, reading: &UnifiedReading) -> Result<PipelineOutcome> {
        reject_foreign(self, reading)?;
        let point = &reading.point;
        let backend = self.storage.for_domain(point.domain);

        backend.insert_point(reading).await?;

        let event_type = match reading.classification {
            Classification::AnomalyDetected => WarningEventType::DeltaSpike,
            _ => WarningEventType::OperationalDeviation,
        };
        let superseded = backend
            .open_warning(WarningEvent {
                series_id: point.series_id.clone(),
                event_type,
                previous_value: reading.delta.as_ref().map(|d| d.prev_value),
                value: point.value,
                absolute_delta: reading.delta.as_ref().map(|d| d.absolute_delta),
                relative_delta: reading.delta.as_ref().map(|d| d.relative_delta),
                opened_at: point.timestamp,
                resolved_at: None,
                resolution_reason: None,
                is_active: true,
            })
            .await?;

        GatewayMetrics::incr(&self.metrics.warnings_opened);
        info!(
            series_id = %point.series_id,
            event_type = ?event_type,
            value = point.value,
            superseded,
            "warning recorded"
        );

        Ok(PipelineOutcome {
            persisted: true,
            published: false,
            resolved_all: false,
            superseded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use types::{DataPoint, DeltaInfo, DeltaTrigger, Domain, OperationalState};

    fn spike_reading(value: f64, prev: f64, ts: f64) -> UnifiedReading {
        let delta = (value - prev).abs();
        UnifiedReading {
            point: DataPoint::new("generic/s/x", value, ts, Domain::Generic),
            classification: Classification::AnomalyDetected,
            reason: ClassifyReason::DeltaSpike,
            explanation: "delta spike".into(),
            delta: Some(DeltaInfo {
                prev_value: prev,
                absolute_delta: delta,
                relative_delta: delta / prev.abs().max(1e-6),
                absolute_slope: delta / 0.2,
                relative_slope: 0.0,
                elapsed_secs: 0.2,
                triggered: vec![DeltaTrigger::AbsDelta],
            }),
            state: OperationalState::Normal,
            prediction_enabled: true,
        }
    }

    fn pipeline() -> (WarningPipeline, Arc<MemoryStore>) {
        let generic = Arc::new(MemoryStore::new("generic"));
        let storage = Arc::new(DomainStorageRouter::new(
            Arc::new(MemoryStore::new("legacy")),
            generic.clone(),
        ));
        (
            WarningPipeline::new(storage, Arc::new(GatewayMetrics::new())),
            generic,
        )
    }

    #[tokio::test]
    async fn spike_event_carries_deltas() {
        let (pipeline, store) = pipeline();
        pipeline.ingest(&spike_reading(55.0, 50.0, 100.2)).await.unwrap();

        let warnings = store.all_warnings("generic/s/x");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].event_type, WarningEventType::DeltaSpike);
        assert_eq!(warnings[0].absolute_delta, Some(5.0));
        assert_eq!(warnings[0].previous_value, Some(50.0));
        assert!(warnings[0].is_active);
    }

    #[tokio::test]
    async fn band_violation_is_operational_deviation() {
        let (pipeline, store) = pipeline();
        let mut reading = spike_reading(95.0, 0.0, 10.0);
        reading.classification = Classification::WarningViolation;
        reading.reason = ClassifyReason::OperationalRange;
        reading.delta = None;
        pipeline.ingest(&reading).await.unwrap();

        let warnings = store.all_warnings("generic/s/x");
        assert_eq!(warnings[0].event_type, WarningEventType::OperationalDeviation);
        assert_eq!(warnings[0].absolute_delta, None);
    }

    #[tokio::test]
    async fn active_warning_is_superseded() {
        let (pipeline, store) = pipeline();
        pipeline.ingest(&spike_reading(55.0, 50.0, 100.2)).await.unwrap();
        let outcome = pipeline.ingest(&spike_reading(60.0, 55.0, 100.4)).await.unwrap();
        assert!(outcome.superseded);

        let active: Vec<_> = store
            .all_warnings("generic/s/x")
            .into_iter()
            .filter(|w| w.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].value, 60.0);
    }

    #[tokio::test]
    async fn rejects_foreign_classes() {
        let (pipeline, _) = pipeline();
        let mut reading = spike_reading(1.0, 1.0, 1.0);
        reading.classification = Classification::CriticalViolation;
        reading.reason = ClassifyReason::PhysicalRange;
        assert!(pipeline.ingest(&reading).await.is_err());

        let mut normal = spike_reading(1.0, 1.0, 1.0);
        normal.classification = Classification::Normal;
        normal.reason = ClassifyReason::Clean;
        assert!(pipeline.ingest(&normal).await.is_err());
    }
}
