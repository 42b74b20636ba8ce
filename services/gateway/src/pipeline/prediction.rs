//! Prediction sub-pipeline.
//!
//! Owns everything classified Normal, including suppressed rewrites
//! (warm-up, cooldown, debounce). Persists the point, upserts the
//! latest-value record, resolves recovered alert/warning records on
//! genuinely clean readings, and — only for publishable readings —
//! hands the point to the throttled bus after persistence succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use types::{Classification, ClassifyReason, UnifiedReading};

use crate::bus::{PredictionMessage, ThrottledBus};
use crate::classify::cooldown::{CooldownTracker, RecordKind};
use crate::error::Result;
use crate::storage::DomainStorageRouter;
use crate::time::now_epoch;

use super::{reject_foreign, PipelineOutcome, SubPipeline};

pub struct PredictionPipeline {
    storage: Arc<DomainStorageRouter>,
    bus: Arc<ThrottledBus>,
    cooldowns: Arc<CooldownTracker>,
}

impl PredictionPipeline {
    pub fn new(
        storage: Arc<DomainStorageRouter>,
        bus: Arc<ThrottledBus>,
        cooldowns: Arc<CooldownTracker>,
    ) -> Self {
        Self {
            storage,
            bus,
            cooldowns,
        }
    }
}

#[async_trait]
impl SubPipeline for PredictionPipeline {
    fn name(&self) -> &'static str {
        "prediction"
    }

    fn accepts(&self, reading: &UnifiedReading) -> bool {
        reading.classification == Classification::Normal
    }

    async fn ingest(&self, reading: &UnifiedReading) -> Result<PipelineOutcome> {
        reject_foreign(self, reading)?;
        let point = &reading.point;
        let backend = self.storage.for_domain(point.domain);

        backend.insert_point(reading).await?;
        backend.upsert_latest(point).await?;

        // Recovery: only a genuinely clean reading resolves active records.
        // A suppressed rewrite (cooldown, debounce) means the value is still
        // misbehaving, so the records stay open.
        let mut resolved_all = false;
        if reading.reason == ClassifyReason::Clean && reading.state.can_generate_events() {
            let now = now_epoch();
            if backend
                .resolve_alert(&point.series_id, point.timestamp, "recovered")
                .await?
            {
                self.cooldowns
                    .note_resolved(&point.series_id, RecordKind::Alert, now);
                debug!(series_id = %point.series_id, "active alert recovered");
            }
            if backend
                .resolve_warning(&point.series_id, point.timestamp, "recovered")
                .await?
            {
                self.cooldowns
                    .note_resolved(&point.series_id, RecordKind::Warning, now);
                debug!(series_id = %point.series_id, "active warning recovered");
            }
            resolved_all = true;
        }

        // Persistence first, then publish; a publish failure is absorbed by
        // the bus and never unwinds the stored point.
        let mut published = false;
        if reading.publishable() {
            self.bus.publish(&PredictionMessage::from_point(point)).await;
            published = true;
        }

        Ok(PipelineOutcome {
            persisted: true,
            published,
            resolved_all,
            superseded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;
    use crate::metrics::GatewayMetrics;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{Severity, SeriesStore, StoredAlert};
    use std::time::Duration;
    use types::{DataPoint, Domain, OperationalState};

    fn reading(reason: ClassifyReason, state: OperationalState, value: f64, ts: f64) -> UnifiedReading {
        UnifiedReading {
            point: DataPoint::new("generic/s/x", value, ts, Domain::Generic),
            classification: Classification::Normal,
            reason,
            explanation: String::new(),
            delta: None,
            state,
            prediction_enabled: true,
        }
    }

    struct Fixture {
        pipeline: PredictionPipeline,
        store: Arc<MemoryStore>,
        bus: Arc<RecordingBus>,
        cooldowns: Arc<CooldownTracker>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new("generic"));
        let storage = Arc::new(DomainStorageRouter::new(
            Arc::new(MemoryStore::new("legacy")),
            store.clone(),
        ));
        let bus = Arc::new(RecordingBus::new());
        let throttled = Arc::new(ThrottledBus::new(
            bus.clone(),
            Duration::from_millis(1),
            Arc::new(GatewayMetrics::new()),
        ));
        let cooldowns = Arc::new(CooldownTracker::new());
        Fixture {
            pipeline: PredictionPipeline::new(storage, throttled, cooldowns.clone()),
            store,
            bus,
            cooldowns,
        }
    }

    #[tokio::test]
    async fn clean_normal_persists_and_publishes() {
        let f = fixture();
        let outcome = f
            .pipeline
            .ingest(&reading(ClassifyReason::Clean, OperationalState::Normal, 10.0, 4.0))
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert!(outcome.published);
        assert_eq!(f.bus.publish_count(), 1);
        assert_eq!(f.store.latest_for("generic/s/x").unwrap().value, 10.0);
    }

    #[tokio::test]
    async fn warmup_reading_persists_without_publishing() {
        let f = fixture();
        let outcome = f
            .pipeline
            .ingest(&reading(
                ClassifyReason::Warmup,
                OperationalState::Initializing,
                10.0,
                1.0,
            ))
            .await
            .unwrap();
        assert!(outcome.persisted);
        assert!(!outcome.published);
        assert_eq!(f.bus.publish_count(), 0);
        assert_eq!(f.store.point_count(), 1);
    }

    #[tokio::test]
    async fn clean_reading_resolves_active_records_and_starts_cooldown() {
        let f = fixture();
        f.store
            .open_alert(StoredAlert {
                series_id: "generic/s/x".into(),
                severity: Severity::Critical,
                threshold_name: "physical_range".into(),
                triggering_value: 120.0,
                triggering_timestamp: 10.0,
                opened_at: 10.0,
                resolved_at: None,
                resolution_reason: None,
                is_active: true,
            })
            .await
            .unwrap();

        let outcome = f
            .pipeline
            .ingest(&reading(ClassifyReason::Clean, OperationalState::Alert, 50.0, 20.0))
            .await
            .unwrap();
        assert!(outcome.resolved_all);

        let alerts = f.store.all_alerts("generic/s/x");
        assert!(!alerts[0].is_active);
        assert_eq!(alerts[0].resolution_reason.as_deref(), Some("recovered"));
        assert!(f
            .cooldowns
            .in_cooldown("generic/s/x", RecordKind::Alert, now_epoch(), 300.0));
    }

    #[tokio::test]
    async fn suppressed_rewrite_leaves_records_active() {
        let f = fixture();
        f.store
            .open_alert(StoredAlert {
                series_id: "generic/s/x".into(),
                severity: Severity::Critical,
                threshold_name: "physical_range".into(),
                triggering_value: 120.0,
                triggering_timestamp: 10.0,
                opened_at: 10.0,
                resolved_at: None,
                resolution_reason: None,
                is_active: true,
            })
            .await
            .unwrap();

        // Cooldown rewrite: the value is still violating under the hood.
        let outcome = f
            .pipeline
            .ingest(&reading(
                ClassifyReason::Cooldown,
                OperationalState::Alert,
                130.0,
                21.0,
            ))
            .await
            .unwrap();
        assert!(!outcome.resolved_all);
        assert!(f.store.all_alerts("generic/s/x")[0].is_active);
    }

    #[tokio::test]
    async fn prediction_flag_gates_publish() {
        let f = fixture();
        let mut r = reading(ClassifyReason::Clean, OperationalState::Normal, 10.0, 4.0);
        r.prediction_enabled = false;
        let outcome = f.pipeline.ingest(&r).await.unwrap();
        assert!(outcome.persisted);
        assert!(!outcome.published);
        assert_eq!(f.bus.publish_count(), 0);
    }

    #[tokio::test]
    async fn rejects_foreign_classes() {
        let f = fixture();
        let mut r = reading(ClassifyReason::Clean, OperationalState::Normal, 1.0, 1.0);
        r.classification = Classification::CriticalViolation;
        r.reason = ClassifyReason::PhysicalRange;
        assert!(f.pipeline.ingest(&r).await.is_err());
        assert_eq!(f.store.point_count(), 0);
        assert_eq!(f.bus.publish_count(), 0);
    }
}
