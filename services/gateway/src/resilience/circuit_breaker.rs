//! Circuit breaker pattern for fault tolerance.
//!
//! One breaker per downstream dependency (each storage backend, the
//! prediction bus). Consecutive transient failures open the circuit; while
//! open, calls are rejected immediately instead of piling onto a dependency
//! that is already down. After the open window a single trial call probes
//! recovery.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::time::now_epoch;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Normal operation; calls flow, consecutive failures are counted.
    Closed,
    /// Failing; calls are rejected immediately.
    Open,
    /// Probing recovery; one trial call is admitted.
    HalfOpen,
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial is admitted.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

struct StateInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    opened_at_epoch: Option<f64>,
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<StateInner>,
    consecutive_failures: AtomicU32,
    trial_in_flight: AtomicBool,

    total_requests: AtomicU64,
    total_failures: AtomicU64,
    circuit_opens: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(StateInner {
                state: CircuitState::Closed,
                opened_at: None,
                opened_at_epoch: None,
            }),
            consecutive_failures: AtomicU32::new(0),
            trial_in_flight: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
        }
    }

    /// Execute an operation through the breaker. While open, the operation
    /// is not invoked at all and the caller gets a fail-fast rejection.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let is_trial = self.admit()?;

        match op().await {
            Ok(value) => {
                self.on_success(is_trial);
                Ok(value)
            }
            Err(e) => {
                // Only dependency failures move the breaker; content errors
                // pass through untouched.
                if e.is_transient() {
                    self.total_failures.fetch_add(1, Ordering::Relaxed);
                    self.on_failure(is_trial);
                } else if is_trial {
                    self.release_trial();
                }
                Err(e)
            }
        }
    }

    /// Decide whether a call may proceed. Returns whether this call is the
    /// half-open trial.
    fn admit(&self) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.open_duration {
                    return Err(GatewayError::CircuitOpen {
                        dependency: self.name.clone(),
                    });
                }
                inner.state = CircuitState::HalfOpen;
                info!(breaker = %self.name, "circuit half-open, admitting trial call");
                self.trial_in_flight.store(true, Ordering::SeqCst);
                Ok(true)
            }
            CircuitState::HalfOpen => {
                // One trial at a time; everyone else keeps failing fast.
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Ok(true)
                } else {
                    Err(GatewayError::CircuitOpen {
                        dependency: self.name.clone(),
                    })
                }
            }
        }
    }

    fn release_trial(&self) {
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    fn on_success(&self, is_trial: bool) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if is_trial {
            let mut inner = self.inner.write();
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.opened_at_epoch = None;
            self.release_trial();
            info!(breaker = %self.name, "circuit closed after successful trial");
        }
    }

    fn on_failure(&self, is_trial: bool) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.write();
        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.opened_at_epoch = Some(now_epoch());
            self.circuit_opens.fetch_add(1, Ordering::Relaxed);
            warn!(
                breaker = %self.name,
                failures,
                "circuit opened"
            );
        }
        if is_trial {
            self.release_trial();
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read();
        BreakerSnapshot {
            state: inner.state,
            opened_at: inner.opened_at_epoch,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            circuit_opens: self.circuit_opens.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view for the resilience-health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<f64>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub circuit_opens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> Result<()> {
        Err(GatewayError::unavailable("dep", "down"))
    }

    fn breaker(threshold: u32, open: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: open,
            },
        )
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            let _ = cb.call(|| async { fail() }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Rejected without invoking the operation.
        let result: Result<()> = cb
            .call(|| async { panic!("must not run while open") })
            .await;
        assert!(matches!(result.unwrap_err(), GatewayError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let cb = breaker(3, Duration::from_secs(60));
        let _ = cb.call(|| async { fail() }).await;
        let _ = cb.call(|| async { fail() }).await;
        let _ = cb.call(|| async { Ok(()) }).await;
        let _ = cb.call(|| async { fail() }).await;
        let _ = cb.call(|| async { fail() }).await;
        // Streak never reached 3 consecutively.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn trial_success_closes_the_circuit() {
        let cb = breaker(1, Duration::from_millis(5));
        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(10)).await;
        cb.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn trial_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(5));
        let _ = cb.call(|| async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        // The window restarted; still rejecting.
        let err = cb.call(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn content_errors_do_not_trip_the_breaker() {
        let cb = breaker(2, Duration::from_secs(60));
        for _ in 0..5 {
            let _ = cb
                .call(|| async {
                    Err::<(), _>(GatewayError::invalid_input("parse", "bad"))
                })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
