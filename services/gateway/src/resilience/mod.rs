//! Resilience layer: idempotency, dead-lettering, bounded retries, and
//! per-dependency circuit breaking.

pub mod circuit_breaker;
pub mod dedup;
pub mod dlq;
pub mod retry;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dedup::{DedupHealth, Deduplicator};
pub use dlq::{DeadLetterEntry, DeadLetterQueue, DlqCategory, DlqConsumer};
pub use retry::{retry_with_backoff, RetryPolicy};
