//! The ingest router.
//!
//! `route` is the single entry point into the core and the only place a
//! classification turns into side effects. Sequence: guards, dedup, context
//! load, classification, exactly one sub-pipeline (wrapped in retry and the
//! backend's circuit breaker), then the state machine, serialized per
//! series by a striped lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use types::{Classification, ClassifyReason, DataPoint, Domain, OperationalState};

use crate::bus::ThrottledBus;
use crate::classify::cooldown::CooldownTracker;
use crate::classify::state_machine::next_state;
use crate::classify::Classifier;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::repository::SeriesRepository;
use crate::resilience::{
    retry_with_backoff, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, DeadLetterEntry,
    DeadLetterQueue, Deduplicator, DlqCategory, RetryPolicy,
};
use crate::storage::DomainStorageRouter;
use crate::time::now_epoch;

use super::guards::{self, GuardConfig};
use super::{AlertPipeline, PipelineOutcome, PredictionPipeline, SubPipeline, WarningPipeline};

const LOCK_STRIPES: usize = 1024;

/// What the router did with a point; transports build their responses
/// from this.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub classification: Classification,
    pub reason: ClassifyReason,
    pub published: bool,
}

pub struct IngestRouter {
    repo: Arc<SeriesRepository>,
    classifier: Classifier,
    alert: AlertPipeline,
    warning: WarningPipeline,
    prediction: PredictionPipeline,
    dedup: Arc<Deduplicator>,
    dlq: Arc<DeadLetterQueue>,
    bus: Arc<ThrottledBus>,
    metrics: Arc<GatewayMetrics>,
    legacy_breaker: CircuitBreaker,
    generic_breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    guards: GuardConfig,
    locks: Vec<tokio::sync::Mutex<()>>,
}

impl IngestRouter {
    /// Build the router once with its collaborators; transports share one
    /// instance behind an `Arc`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<DomainStorageRouter>,
        repo: Arc<SeriesRepository>,
        bus: Arc<ThrottledBus>,
        dedup: Arc<Deduplicator>,
        dlq: Arc<DeadLetterQueue>,
        metrics: Arc<GatewayMetrics>,
        retry_policy: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        guards: GuardConfig,
    ) -> Self {
        let cooldowns = Arc::new(CooldownTracker::new());
        Self {
            repo,
            classifier: Classifier::new(cooldowns.clone()),
            alert: AlertPipeline::new(storage.clone(), metrics.clone()),
            warning: WarningPipeline::new(storage.clone(), metrics.clone()),
            prediction: PredictionPipeline::new(storage, bus.clone(), cooldowns),
            dedup,
            dlq,
            bus,
            metrics,
            legacy_breaker: CircuitBreaker::new("legacy", breaker_config),
            generic_breaker: CircuitBreaker::new("generic", breaker_config),
            retry_policy,
            guards,
            locks: (0..LOCK_STRIPES)
                .map(|_| tokio::sync::Mutex::new(()))
                .collect(),
        }
    }

    fn lock_for(&self, series_id: &str) -> &tokio::sync::Mutex<()> {
        let mut hasher = DefaultHasher::new();
        series_id.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % self.locks.len()]
    }

    fn breaker_for(&self, domain: Domain) -> &CircuitBreaker {
        if domain.is_legacy() {
            &self.legacy_breaker
        } else {
            &self.generic_breaker
        }
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Breaker states for the resilience-health surface.
    pub fn breaker_snapshots(&self) -> HashMap<&'static str, BreakerSnapshot> {
        let mut map = HashMap::new();
        map.insert("legacy", self.legacy_breaker.snapshot());
        map.insert("generic", self.generic_breaker.snapshot());
        map.insert("bus", self.bus.breaker_snapshot());
        map
    }

    async fn dead_letter(
        &self,
        point: &DataPoint,
        transport: &str,
        category: DlqCategory,
        detail: String,
        now: f64,
    ) {
        GatewayMetrics::incr(&self.metrics.dlq_written);
        let raw = serde_json::to_string(point).unwrap_or_default();
        self.dlq
            .push(DeadLetterEntry {
                transport: transport.to_string(),
                raw,
                category,
                detail,
                first_failed_at: now,
                attempts: 0,
                msg_id: Some(point.effective_msg_id()),
            })
            .await;
    }

    /// Route one point end to end.
    pub async fn route(&self, mut point: DataPoint, transport: &str) -> Result<RouteOutcome> {
        GatewayMetrics::incr(&self.metrics.points_received);
        let now = now_epoch();
        if point.ingested_at.is_none() {
            point.ingested_at = Some(now);
        }

        // 1. Guards: syntactic sanity before anything stateful runs.
        if let Err(e) = guards::check_point(&point, now, &self.guards) {
            GatewayMetrics::incr(&self.metrics.points_rejected);
            warn!(
                series_id = %point.series_id,
                transport,
                error = %e,
                "point rejected by guards"
            );
            self.dead_letter(&point, transport, DlqCategory::Guards, e.to_string(), now)
                .await;
            return Err(e);
        }

        // 2. Idempotency.
        let msg_id = point.effective_msg_id();
        if self.dedup.is_duplicate(&msg_id).await {
            GatewayMetrics::incr(&self.metrics.dedup_hits);
            return Err(GatewayError::Duplicate { msg_id });
        }

        // 3. Per-series context; domain defaults apply on a missing config.
        let context = async {
            let config = self.repo.config_for(&point.series_id, point.domain).await?;
            let state = self
                .repo
                .state_for(&point.series_id, point.domain, now)
                .await?;
            Ok::<_, GatewayError>((config, state))
        }
        .await;
        let (config, state) = match context {
            Ok(ctx) => ctx,
            Err(e) => {
                GatewayMetrics::incr(&self.metrics.persist_failures);
                self.dead_letter(&point, transport, DlqCategory::Persist, e.to_string(), now)
                    .await;
                return Err(e);
            }
        };

        if guards::is_suspicious_zero(
            point.value,
            state.last_value,
            self.guards.suspicious_zero_threshold,
        ) {
            GatewayMetrics::incr(&self.metrics.suspicious_zeros);
            warn!(
                series_id = %point.series_id,
                prev_value = ?state.last_value,
                timestamp = point.timestamp,
                transport,
                "suspicious exact-zero reading"
            );
        }

        // 4. Classify in the loaded context.
        let mut reading = self.classifier.classify(&point, &config, &state, now);
        reading.point.processed_at = Some(now);

        // 5-7. Serialize persistence and the state transition per series.
        let _series_guard = self.lock_for(&point.series_id).lock().await;

        let pipeline: &dyn SubPipeline = match reading.classification {
            Classification::CriticalViolation => &self.alert,
            Classification::WarningViolation | Classification::AnomalyDetected => &self.warning,
            Classification::Normal => &self.prediction,
            Classification::Rejected => {
                // Guards already ran; a Rejected classification here is a bug.
                GatewayMetrics::incr(&self.metrics.internal_errors);
                let e = GatewayError::internal("rejected classification reached dispatch");
                self.dead_letter(
                    &point,
                    transport,
                    DlqCategory::ClassifierBug,
                    e.to_string(),
                    now,
                )
                .await;
                return Err(e);
            }
        };

        let breaker = self.breaker_for(point.domain);
        let outcome: Result<PipelineOutcome> =
            retry_with_backoff(self.retry_policy, pipeline.name(), || {
                breaker.call(|| pipeline.ingest(&reading))
            })
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.kind() == ErrorKind::Internal => {
                GatewayMetrics::incr(&self.metrics.internal_errors);
                error!(
                    series_id = %point.series_id,
                    classification = reading.classification.as_str(),
                    reason = reading.reason.as_str(),
                    error = %e,
                    "pipeline invariant violated"
                );
                self.dead_letter(
                    &point,
                    transport,
                    DlqCategory::ClassifierBug,
                    e.to_string(),
                    now,
                )
                .await;
                return Err(e);
            }
            Err(e) => {
                GatewayMetrics::incr(&self.metrics.persist_failures);
                self.dead_letter(&point, transport, DlqCategory::Persist, e.to_string(), now)
                    .await;
                return Err(e);
            }
        };

        // 7. State machine, write-through with the counter increment.
        let mut updated = state.clone();
        updated.valid_readings_count += 1;
        updated.last_value = Some(point.value);
        updated.last_timestamp = Some(point.timestamp);
        if let Some(to) = next_state(
            &state,
            &reading,
            updated.valid_readings_count,
            outcome.resolved_all,
        ) {
            if to == OperationalState::Initializing {
                // Re-entering warm-up: this point is the first of the run.
                updated.valid_readings_count = 1;
            }
            debug!(
                series_id = %point.series_id,
                from = state.state.as_str(),
                to = to.as_str(),
                "state transition"
            );
            updated.state = to;
            updated.state_changed_at = now;
            GatewayMetrics::incr(&self.metrics.state_transitions);
        }
        if let Err(e) = self.repo.update_state(updated).await {
            // The point is already durably stored; failing the call now
            // would push the producer into a retry and a duplicate.
            warn!(series_id = %point.series_id, error = %e, "state write-through failed");
        }

        GatewayMetrics::incr(&self.metrics.points_accepted);
        Ok(RouteOutcome {
            classification: reading.classification,
            reason: reading.reason,
            published: outcome.published,
        })
    }

    /// Route under a deadline. On expiry the point is dead-lettered as
    /// cancelled; dedup claims made before the cancel stay in place so a
    /// replayed duplicate is still dropped.
    pub async fn route_with_timeout(
        &self,
        point: DataPoint,
        transport: &str,
        deadline: Duration,
    ) -> Result<RouteOutcome> {
        let for_dlq = point.clone();
        match tokio::time::timeout(deadline, self.route(point, transport)).await {
            Ok(result) => result,
            Err(_) => {
                let now = now_epoch();
                self.dead_letter(
                    &for_dlq,
                    transport,
                    DlqCategory::Cancelled,
                    format!("deadline of {}ms exceeded", deadline.as_millis()),
                    now,
                )
                .await;
                Err(GatewayError::unavailable(
                    "router",
                    "request deadline exceeded",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn router_over_memory() -> (Arc<IngestRouter>, Arc<MemoryStore>, Arc<DeadLetterQueue>) {
        let legacy = Arc::new(MemoryStore::new("legacy"));
        let generic = Arc::new(MemoryStore::new("generic"));
        let storage = Arc::new(DomainStorageRouter::new(legacy, generic.clone()));
        let repo = Arc::new(SeriesRepository::new(
            storage.clone(),
            Duration::from_secs(300),
            1024,
            1,
        ));
        let metrics = Arc::new(GatewayMetrics::new());
        let bus = Arc::new(ThrottledBus::new(
            Arc::new(crate::bus::RecordingBus::new()),
            Duration::from_millis(1),
            metrics.clone(),
        ));
        let dlq = Arc::new(DeadLetterQueue::memory(100));
        let router = IngestRouter::new(
            storage,
            repo,
            bus,
            Arc::new(Deduplicator::memory(Duration::from_secs(60))),
            dlq.clone(),
            metrics,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            CircuitBreakerConfig::default(),
            GuardConfig::default(),
        );
        (Arc::new(router), generic, dlq)
    }

    #[tokio::test]
    async fn guard_rejections_go_to_dlq() {
        let (router, store, dlq) = router_over_memory();
        let point = DataPoint::new("generic/a/b", f64::NAN, now_epoch(), Domain::Generic);
        let err = router.route(point, "test").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(store.point_count(), 0);
        assert_eq!(dlq.depth().await, 1);
    }

    #[tokio::test]
    async fn duplicates_are_dropped_silently() {
        let (router, store, _) = router_over_memory();
        let mut point = DataPoint::new("generic/a/b", 5.0, now_epoch(), Domain::Generic);
        point.msg_id = Some("fixed-id".into());

        router.route(point.clone(), "test").await.unwrap();
        let err = router.route(point, "test").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(store.point_count(), 1);
        assert_eq!(router.metrics().snapshot().dedup_hits, 1);
    }

    #[tokio::test]
    async fn accepted_points_reach_exactly_one_pipeline() {
        let (router, store, _) = router_over_memory();
        let point = DataPoint::new("generic/a/b", 5.0, now_epoch(), Domain::Generic);
        let outcome = router.route(point, "test").await.unwrap();
        assert_eq!(outcome.classification, Classification::Normal);
        assert_eq!(store.point_count(), 1);
    }
}
