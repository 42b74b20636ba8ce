//! Per-series throttling of the prediction bus.
//!
//! At most one publish per series inside the configured interval; excess
//! publishes are dropped silently and counted. The bus is fire-and-forget
//! end to end: a publish failure is logged at most once a minute per
//! series, never retried, never escalated to the caller.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::{debug, warn};

use super::{PredictionBus, PredictionMessage};
use crate::metrics::GatewayMetrics;
use crate::resilience::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};

const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub struct ThrottledBus {
    inner: Arc<dyn PredictionBus>,
    limiter: DefaultKeyedRateLimiter<String>,
    breaker: CircuitBreaker,
    metrics: Arc<GatewayMetrics>,
    dropped: AtomicU64,
    last_error_log: DashMap<String, Instant>,
}

impl ThrottledBus {
    /// `min_interval` must be positive; one token per interval per series.
    pub fn new(
        inner: Arc<dyn PredictionBus>,
        min_interval: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self::with_breaker(inner, min_interval, metrics, CircuitBreakerConfig::default())
    }

    pub fn with_breaker(
        inner: Arc<dyn PredictionBus>,
        min_interval: Duration,
        metrics: Arc<GatewayMetrics>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let interval = if min_interval.is_zero() {
            Duration::from_millis(1)
        } else {
            min_interval
        };
        let quota = Quota::with_period(interval)
            .expect("non-zero publish interval")
            .allow_burst(NonZeroU32::new(1).expect("burst of one"));
        Self {
            inner,
            limiter: RateLimiter::keyed(quota),
            breaker: CircuitBreaker::new("bus", breaker_config),
            metrics,
            dropped: AtomicU64::new(0),
            last_error_log: DashMap::new(),
        }
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Publish unless the series is inside its throttle window. Errors from
    /// the underlying channel are swallowed by design.
    pub async fn publish(&self, message: &PredictionMessage) {
        if self.limiter.check_key(&message.series_id).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            GatewayMetrics::incr(&self.metrics.bus_throttled);
            debug!(series_id = %message.series_id, "publish throttled");
            return;
        }

        let inner = &self.inner;
        match self.breaker.call(|| inner.publish(message)).await {
            Ok(()) => {
                GatewayMetrics::incr(&self.metrics.bus_published);
            }
            Err(e) => {
                GatewayMetrics::incr(&self.metrics.bus_publish_failures);
                let should_log = self
                    .last_error_log
                    .get(&message.series_id)
                    .map(|at| at.elapsed() >= ERROR_LOG_INTERVAL)
                    .unwrap_or(true);
                if should_log {
                    self.last_error_log
                        .insert(message.series_id.clone(), Instant::now());
                    warn!(series_id = %message.series_id, error = %e, "bus publish failed");
                }
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingBus;

    fn message(series: &str, ts: f64) -> PredictionMessage {
        PredictionMessage {
            series_id: series.to_string(),
            value: 1.0,
            timestamp: ts,
            ingested_at: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn second_publish_in_window_is_dropped() {
        let inner = Arc::new(RecordingBus::new());
        let bus = ThrottledBus::new(
            inner.clone(),
            Duration::from_secs(60),
            Arc::new(GatewayMetrics::new()),
        );

        bus.publish(&message("s", 1.0)).await;
        bus.publish(&message("s", 1.5)).await;
        assert_eq!(inner.publish_count(), 1);
        assert_eq!(bus.dropped(), 1);
    }

    #[tokio::test]
    async fn series_throttle_independently() {
        let inner = Arc::new(RecordingBus::new());
        let bus = ThrottledBus::new(
            inner.clone(),
            Duration::from_secs(60),
            Arc::new(GatewayMetrics::new()),
        );

        bus.publish(&message("a", 1.0)).await;
        bus.publish(&message("b", 1.0)).await;
        assert_eq!(inner.publish_count(), 2);
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn publish_failures_never_surface() {
        let inner = Arc::new(RecordingBus::new());
        inner.set_failing(true);
        let metrics = Arc::new(GatewayMetrics::new());
        let bus = ThrottledBus::new(inner.clone(), Duration::from_millis(1), metrics.clone());

        // No panic, no error; just the counter.
        bus.publish(&message("s", 1.0)).await;
        assert_eq!(metrics.snapshot().bus_publish_failures, 1);
        assert_eq!(inner.publish_count(), 0);
    }
}
