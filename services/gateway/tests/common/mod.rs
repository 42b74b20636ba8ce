#![allow(dead_code)]

//! Shared harness: the full router wired over in-memory backends and a
//! recording bus, the way production wires it over SQL and Redis.

use std::sync::Arc;
use std::time::Duration;

use ingest_gateway::bus::{RecordingBus, ThrottledBus};
use ingest_gateway::metrics::GatewayMetrics;
use ingest_gateway::pipeline::guards::GuardConfig;
use ingest_gateway::pipeline::IngestRouter;
use ingest_gateway::repository::SeriesRepository;
use ingest_gateway::resilience::{
    CircuitBreakerConfig, DeadLetterQueue, Deduplicator, RetryPolicy,
};
use ingest_gateway::storage::memory::MemoryStore;
use ingest_gateway::storage::{DomainStorageRouter, SeriesStore};
use ingest_gateway::time::now_epoch;
use types::{
    BandLimits, DataPoint, Domain, OperationalState, RateOfChangeLimits, SeriesState,
    StreamConfig,
};

pub struct Harness {
    pub router: Arc<IngestRouter>,
    pub legacy: Arc<MemoryStore>,
    pub generic: Arc<MemoryStore>,
    pub bus: Arc<RecordingBus>,
    pub dlq: Arc<DeadLetterQueue>,
    pub repo: Arc<SeriesRepository>,
    pub dedup: Arc<Deduplicator>,
    /// Wall-clock base; scenario timestamps are offsets from here so the
    /// guards' 24-hour window never interferes.
    pub base: f64,
}

pub struct HarnessOptions {
    pub warmup: u32,
    pub dedup_ttl: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            warmup: 1,
            dedup_ttl: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                open_duration: Duration::from_millis(50),
            },
        }
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    let legacy = Arc::new(MemoryStore::new("legacy"));
    let generic = Arc::new(MemoryStore::new("generic"));
    let storage = Arc::new(DomainStorageRouter::new(legacy.clone(), generic.clone()));
    let repo = Arc::new(SeriesRepository::new(
        storage.clone(),
        Duration::from_secs(300),
        10_000,
        options.warmup,
    ));
    let metrics = Arc::new(GatewayMetrics::new());
    let bus = Arc::new(RecordingBus::new());
    let throttled = Arc::new(ThrottledBus::new(
        bus.clone(),
        Duration::from_millis(1),
        metrics.clone(),
    ));
    let dedup = Arc::new(Deduplicator::memory(options.dedup_ttl));
    let dlq = Arc::new(DeadLetterQueue::memory(10_000));

    let router = Arc::new(IngestRouter::new(
        storage,
        repo.clone(),
        throttled,
        dedup.clone(),
        dlq.clone(),
        metrics,
        options.retry,
        options.breaker,
        GuardConfig::default(),
    ));

    Harness {
        router,
        legacy,
        generic,
        bus,
        dlq,
        repo,
        dedup,
        base: now_epoch() - 1000.0,
    }
}

impl Harness {
    pub fn point(&self, series: &str, value: f64, t: f64) -> DataPoint {
        DataPoint::new(series, value, self.base + t, Domain::of_series(series))
    }

    /// Seed a config with the given bands on the generic backend.
    pub fn seed_config(
        &self,
        series: &str,
        critical: BandLimits,
        operational: BandLimits,
        rate_of_change: Option<RateOfChangeLimits>,
    ) {
        let mut cfg = StreamConfig::defaults_for(series, Domain::of_series(series));
        cfg.constraints.critical = critical;
        cfg.constraints.operational = operational;
        if let Some(roc) = rate_of_change {
            cfg.constraints.rate_of_change = roc;
        }
        self.generic.put_config(cfg);
    }

    /// Put a series straight into NORMAL, warm-up long done.
    pub async fn seed_normal_state(&self, series: &str) {
        let mut state = SeriesState::new(series, 1, self.base);
        state.state = OperationalState::Normal;
        state.valid_readings_count = 50;
        self.generic.store_state(&state).await.unwrap();
    }
}
