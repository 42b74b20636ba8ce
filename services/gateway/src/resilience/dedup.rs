//! Message deduplication.
//!
//! Idempotency window over msg ids, backed by Redis `SET NX EX`. The
//! deduplicator fails open: when the backing store is unreachable every
//! check passes, a health flag flips, and ingestion continues. A dropped
//! duplicate is cheaper than a dropped reading, the reverse is not.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "dedup:msg:";

enum Backend {
    Redis(ConnectionManager),
    /// In-process window for tests and single-node runs.
    Memory(DashMap<String, Instant>),
    Disabled,
}

/// Health snapshot surfaced on `/resilience/health`.
#[derive(Debug, Clone, Serialize)]
pub struct DedupHealth {
    pub available: bool,
    pub total_checked: u64,
    pub duplicates_found: u64,
}

pub struct Deduplicator {
    backend: Backend,
    ttl: Duration,
    available: AtomicBool,
    total_checked: AtomicU64,
    duplicates_found: AtomicU64,
}

impl Deduplicator {
    pub fn redis(conn: ConnectionManager, ttl: Duration) -> Self {
        Self::with_backend(Backend::Redis(conn), ttl)
    }

    pub fn memory(ttl: Duration) -> Self {
        Self::with_backend(Backend::Memory(DashMap::new()), ttl)
    }

    /// Passthrough deduplicator: every message is new.
    pub fn disabled() -> Self {
        Self::with_backend(Backend::Disabled, Duration::ZERO)
    }

    fn with_backend(backend: Backend, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            available: AtomicBool::new(true),
            total_checked: AtomicU64::new(0),
            duplicates_found: AtomicU64::new(0),
        }
    }

    /// Check-and-record in one step: `false` atomically claims the id for
    /// the TTL window, `true` means it was already claimed.
    pub async fn is_duplicate(&self, msg_id: &str) -> bool {
        if msg_id.is_empty() {
            return false;
        }
        self.total_checked.fetch_add(1, Ordering::Relaxed);

        let duplicate = match &self.backend {
            Backend::Disabled => false,
            Backend::Memory(map) => {
                // Claim if absent or expired.
                let now = Instant::now();
                let mut duplicate = false;
                map.entry(msg_id.to_string())
                    .and_modify(|claimed_at| {
                        if now.duration_since(*claimed_at) < self.ttl {
                            duplicate = true;
                        } else {
                            *claimed_at = now;
                        }
                    })
                    .or_insert(now);
                duplicate
            }
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let outcome: redis::RedisResult<Option<String>> = redis::cmd("SET")
                    .arg(format!("{KEY_PREFIX}{msg_id}"))
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(self.ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await;
                match outcome {
                    // SET NX returns nil when the key already existed.
                    Ok(set) => {
                        self.available.store(true, Ordering::Relaxed);
                        set.is_none()
                    }
                    Err(e) => {
                        // Fail open: passthrough mode until Redis returns.
                        if self.available.swap(false, Ordering::Relaxed) {
                            warn!(error = %e, "dedup store unreachable, entering passthrough mode");
                        }
                        false
                    }
                }
            }
        };

        if duplicate {
            self.duplicates_found.fetch_add(1, Ordering::Relaxed);
            debug!(msg_id, "duplicate message dropped");
        }
        duplicate
    }

    pub fn health(&self) -> DedupHealth {
        DedupHealth {
            available: self.available.load(Ordering::Relaxed),
            total_checked: self.total_checked.load(Ordering::Relaxed),
            duplicates_found: self.duplicates_found.load(Ordering::Relaxed),
        }
    }
}
