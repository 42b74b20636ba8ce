//! Default configuration values and constants
//!
//! Named constants used across gateway services for consistency. Anything
//! a deployment is expected to tune also has an environment key in the
//! parent module; values here are the documented fallbacks.

/// Deduplication window (seconds).
pub const DEDUP_TTL_SECS: u64 = 60;

/// Dead-letter queue bounded-ring capacity; oldest entries drop when full.
pub const DLQ_MAX_LEN: usize = 10_000;

/// Consecutive failures before a circuit breaker opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Seconds an open breaker waits before admitting a trial call.
pub const BREAKER_OPEN_SECS: u64 = 30;

/// Persistence retry attempts (including the first).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 100;

/// Backoff ceiling (milliseconds).
pub const RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Minimum interval between bus publishes for one series (seconds).
pub const BUS_MIN_INTERVAL_SECS: f64 = 1.0;

/// Read-through TTL for the constraint and state caches (seconds).
pub const CACHE_TTL_SECS: u64 = 300;

/// Cache capacity before least-recently-used eviction kicks in.
pub const CACHE_CAPACITY: usize = 10_000;

/// Valid readings required before a series leaves warm-up.
pub const WARMUP_READINGS: u32 = 10;

/// Seconds without a point before a series is swept to STALE.
pub const STALE_TIMEOUT_SECS: u64 = 7_200;

/// Period of the staleness sweeper task (seconds).
pub const STALE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Device/sensor membership lookup cache TTL (seconds).
pub const DEVICE_AUTH_CACHE_TTL_SECS: u64 = 300;

/// Bounded internal channel between the MQTT network loop and its workers.
pub const MQTT_QUEUE_CAPACITY: usize = 10_000;

/// Workers draining the MQTT channel.
pub const MQTT_WORKER_COUNT: usize = 8;

/// Concurrent in-flight limit on the HTTP ingest surface.
pub const HTTP_MAX_IN_FLIGHT: usize = 256;

/// In-flight frames above which a WebSocket session is closed (1013).
pub const WS_MAX_IN_FLIGHT: usize = 100;

/// Per-series lock stripes in the router.
pub const ROUTER_LOCK_STRIPES: usize = 1024;

/// Guards: oldest accepted timestamp relative to now (seconds).
pub const MAX_POINT_AGE_SECS: f64 = 24.0 * 3600.0;

/// Guards: tolerated future clock skew (seconds).
pub const MAX_FUTURE_SKEW_SECS: f64 = 60.0;

/// Guards: prior magnitude above which an exact zero is suspicious.
pub const SUSPICIOUS_ZERO_THRESHOLD: f64 = 5.0;

/// DLQ replay consumer batch size.
pub const DLQ_CONSUMER_BATCH_SIZE: usize = 10;

/// DLQ replay consumer cadence (seconds).
pub const DLQ_CONSUMER_INTERVAL_SECS: u64 = 60;

/// Replay attempts before a DLQ entry is archived.
pub const DLQ_MAX_REPLAYS: u32 = 3;
