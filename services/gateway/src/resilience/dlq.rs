//! Dead-letter queue.
//!
//! Append-only ordered log of messages that failed parsing or exhausted
//! their retries. Bounded ring: when full, the oldest entry is dropped and
//! counted. A replay consumer re-submits recoverable entries through the
//! router at a fixed cadence, preserving their original msg ids so dedup
//! behaves correctly on replay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

const STREAM: &str = "dlq:entries";
const ARCHIVE_STREAM: &str = "dlq:archive";

/// Why a message landed in the DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqCategory {
    Parse,
    Guards,
    Persist,
    Cancelled,
    ClassifierBug,
}

impl DlqCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqCategory::Parse => "parse",
            DlqCategory::Guards => "guards",
            DlqCategory::Persist => "persist",
            DlqCategory::Cancelled => "cancelled",
            DlqCategory::ClassifierBug => "classifier_bug",
        }
    }

    /// Only persistence-side failures are worth replaying; the rest failed
    /// on content and will fail identically again.
    pub fn replayable(&self) -> bool {
        matches!(self, DlqCategory::Persist | DlqCategory::Cancelled)
    }
}

/// One dead-lettered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub transport: String,
    /// Raw payload as received (JSON text for every current transport).
    pub raw: String,
    pub category: DlqCategory,
    pub detail: String,
    pub first_failed_at: f64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
}

enum Backend {
    Redis(ConnectionManager),
    Memory(Mutex<VecDeque<DeadLetterEntry>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqHealth {
    pub depth: u64,
    pub written: u64,
    pub dropped_oldest: u64,
}

pub struct DeadLetterQueue {
    backend: Backend,
    max_len: usize,
    written: AtomicU64,
    dropped_oldest: AtomicU64,
    archived: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn redis(conn: ConnectionManager, max_len: usize) -> Self {
        Self::with_backend(Backend::Redis(conn), max_len)
    }

    pub fn memory(max_len: usize) -> Self {
        Self::with_backend(Backend::Memory(Mutex::new(VecDeque::new())), max_len)
    }

    fn with_backend(backend: Backend, max_len: usize) -> Self {
        Self {
            backend,
            max_len,
            written: AtomicU64::new(0),
            dropped_oldest: AtomicU64::new(0),
            archived: Mutex::new(Vec::new()),
        }
    }

    /// Append an entry; never fails the caller. A full ring drops its
    /// oldest entry, an unreachable store drops this one — both counted.
    pub async fn push(&self, entry: DeadLetterEntry) {
        match &self.backend {
            Backend::Memory(queue) => {
                let mut queue = queue.lock();
                if queue.len() >= self.max_len {
                    queue.pop_front();
                    self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
                }
                queue.push_back(entry);
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let payload = match serde_json::to_string(&entry) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "unserializable DLQ entry dropped");
                        return;
                    }
                };
                if self.depth().await >= self.max_len as u64 {
                    self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
                }
                let outcome: redis::RedisResult<String> = redis::cmd("XADD")
                    .arg(STREAM)
                    .arg("MAXLEN")
                    .arg("~")
                    .arg(self.max_len)
                    .arg("*")
                    .arg("entry")
                    .arg(payload)
                    .query_async(&mut conn)
                    .await;
                match outcome {
                    Ok(_) => {
                        self.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(error = %e, "DLQ store unreachable, entry dropped"),
                }
            }
        }
    }

    pub async fn depth(&self) -> u64 {
        match &self.backend {
            Backend::Memory(queue) => queue.lock().len() as u64,
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                redis::cmd("XLEN")
                    .arg(STREAM)
                    .query_async::<_, u64>(&mut conn)
                    .await
                    .unwrap_or(0)
            }
        }
    }

    /// Pop up to `n` entries for replay. Entries leave the queue here; the
    /// consumer requeues or archives what it cannot recover.
    pub async fn fetch_batch(&self, n: usize) -> Result<Vec<DeadLetterEntry>> {
        match &self.backend {
            Backend::Memory(queue) => {
                let mut queue = queue.lock();
                let take = n.min(queue.len());
                Ok(queue.drain(..take).collect())
            }
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let raw: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
                    .arg(STREAM)
                    .arg("-")
                    .arg("+")
                    .arg("COUNT")
                    .arg(n)
                    .query_async(&mut conn)
                    .await
                    .map_err(GatewayError::from)?;

                let mut entries = Vec::with_capacity(raw.len());
                for (id, fields) in raw {
                    redis::cmd("XDEL")
                        .arg(STREAM)
                        .arg(&id)
                        .query_async::<_, u64>(&mut conn)
                        .await
                        .map_err(GatewayError::from)?;
                    if let Some((_, payload)) = fields.iter().find(|(k, _)| k == "entry") {
                        match serde_json::from_str::<DeadLetterEntry>(payload) {
                            Ok(entry) => entries.push(entry),
                            Err(e) => warn!(error = %e, id, "undecodable DLQ entry skipped"),
                        }
                    }
                }
                Ok(entries)
            }
        }
    }

    /// Put an entry back at the end of the ring after a failed replay.
    pub async fn requeue(&self, entry: DeadLetterEntry) {
        self.push(entry).await;
        // push counts a write; a requeue is not new traffic.
        self.written.fetch_sub(1, Ordering::Relaxed);
    }

    /// Entries that exhausted their replay attempts.
    pub async fn archive(&self, entry: DeadLetterEntry) {
        match &self.backend {
            Backend::Memory(_) => self.archived.lock().push(entry),
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                if let Ok(payload) = serde_json::to_string(&entry) {
                    let outcome: redis::RedisResult<String> = redis::cmd("XADD")
                        .arg(ARCHIVE_STREAM)
                        .arg("*")
                        .arg("entry")
                        .arg(payload)
                        .query_async(&mut conn)
                        .await;
                    if let Err(e) = outcome {
                        warn!(error = %e, "DLQ archive unreachable, entry dropped");
                    }
                }
            }
        }
    }

    pub fn archived_count(&self) -> usize {
        self.archived.lock().len()
    }

    pub async fn health(&self) -> DlqHealth {
        DlqHealth {
            depth: self.depth().await,
            written: self.written.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
        }
    }
}

/// Periodic replay of recoverable DLQ entries through the router.
pub struct DlqConsumer {
    dlq: Arc<DeadLetterQueue>,
    router: Arc<crate::pipeline::router::IngestRouter>,
    batch_size: usize,
    interval: Duration,
    max_replays: u32,
}

impl DlqConsumer {
    pub fn new(
        dlq: Arc<DeadLetterQueue>,
        router: Arc<crate::pipeline::router::IngestRouter>,
        batch_size: usize,
        interval: Duration,
        max_replays: u32,
    ) -> Self {
        Self {
            dlq,
            router,
            batch_size,
            interval,
            max_replays,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(batch = self.batch_size, "DLQ consumer started");
        loop {
            ticker.tick().await;
            self.drain_once().await;
        }
    }

    /// One replay pass; factored out so tests can drive it directly.
    pub async fn drain_once(&self) {
        let batch = match self.dlq.fetch_batch(self.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "DLQ fetch failed, skipping replay pass");
                return;
            }
        };
        for mut entry in batch {
            if !entry.category.replayable() {
                self.dlq.archive(entry).await;
                continue;
            }
            let mut point: types::DataPoint = match serde_json::from_str(&entry.raw) {
                Ok(point) => point,
                Err(e) => {
                    warn!(error = %e, "DLQ entry no longer parseable, archiving");
                    self.dlq.archive(entry).await;
                    continue;
                }
            };
            // Replays carry the original msg id so dedup still applies.
            point.msg_id = entry.msg_id.clone();
            match self.router.route(point, "dlq-replay").await {
                Ok(_) | Err(GatewayError::Duplicate { .. }) => {
                    debug!(transport = %entry.transport, "DLQ entry recovered");
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts >= self.max_replays {
                        warn!(error = %e, attempts = entry.attempts, "DLQ entry exhausted replays, archiving");
                        self.dlq.archive(entry).await;
                    } else {
                        self.dlq.requeue(entry).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(detail: &str, category: DlqCategory) -> DeadLetterEntry {
        DeadLetterEntry {
            transport: "test".into(),
            raw: "{}".into(),
            category,
            detail: detail.into(),
            first_failed_at: 100.0,
            attempts: 0,
            msg_id: None,
        }
    }

    #[tokio::test]
    async fn bounded_ring_drops_oldest() {
        let dlq = DeadLetterQueue::memory(2);
        dlq.push(entry("a", DlqCategory::Persist)).await;
        dlq.push(entry("b", DlqCategory::Persist)).await;
        dlq.push(entry("c", DlqCategory::Persist)).await;

        let health = dlq.health().await;
        assert_eq!(health.depth, 2);
        assert_eq!(health.dropped_oldest, 1);

        let batch = dlq.fetch_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].detail, "b");
        assert_eq!(batch[1].detail, "c");
    }

    #[tokio::test]
    async fn fetch_removes_entries() {
        let dlq = DeadLetterQueue::memory(10);
        dlq.push(entry("a", DlqCategory::Guards)).await;
        assert_eq!(dlq.fetch_batch(5).await.unwrap().len(), 1);
        assert_eq!(dlq.depth().await, 0);
    }

    #[test]
    fn only_persistence_failures_replay() {
        assert!(DlqCategory::Persist.replayable());
        assert!(DlqCategory::Cancelled.replayable());
        assert!(!DlqCategory::Parse.replayable());
        assert!(!DlqCategory::Guards.replayable());
        assert!(!DlqCategory::ClassifierBug.replayable());
    }
}
