//! Prediction bus.
//!
//! Fire-and-forget publisher of clean data points to the downstream
//! prediction channel. The outer [`throttled`] wrapper enforces the
//! per-series minimum publish interval; the inner publisher is swappable so
//! tests record publishes in memory.

pub mod throttled;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use types::DataPoint;

use crate::error::Result;

pub use throttled::ThrottledBus;

const BUS_STREAM: &str = "predictions:clean";
/// Retention guard on the stream; consumers are expected to keep up.
const BUS_STREAM_MAXLEN: usize = 100_000;

/// Message shape on the prediction channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionMessage {
    pub series_id: String,
    pub value: f64,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PredictionMessage {
    pub fn from_point(point: &DataPoint) -> Self {
        Self {
            series_id: point.series_id.clone(),
            value: point.value,
            timestamp: point.timestamp,
            ingested_at: point.ingested_at,
            metadata: point.metadata.clone(),
        }
    }
}

/// The publishing side of the prediction channel.
#[async_trait]
pub trait PredictionBus: Send + Sync {
    async fn publish(&self, message: &PredictionMessage) -> Result<()>;
}

/// Redis-stream publisher, the production channel.
pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PredictionBus for RedisBus {
    async fn publish(&self, message: &PredictionMessage) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("XADD")
            .arg(BUS_STREAM)
            .arg("MAXLEN")
            .arg("~")
            .arg(BUS_STREAM_MAXLEN)
            .arg("*")
            .arg("message")
            .arg(serde_json::to_string(message)?)
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Stand-in publisher for deployments without a bus store: accepts and
/// discards. Keeps the rest of the gateway identical when the prediction
/// channel is not provisioned.
pub struct NoopBus;

#[async_trait]
impl PredictionBus for NoopBus {
    async fn publish(&self, message: &PredictionMessage) -> Result<()> {
        tracing::trace!(series_id = %message.series_id, "bus not configured, publish discarded");
        Ok(())
    }
}

/// Recording bus for tests: every accepted publish is kept in order.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<PredictionMessage>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PredictionMessage> {
        self.published.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn published_for(&self, series_id: &str) -> usize {
        self.published
            .lock()
            .iter()
            .filter(|m| m.series_id == series_id)
            .count()
    }
}

#[async_trait]
impl PredictionBus for RecordingBus {
    async fn publish(&self, message: &PredictionMessage) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::GatewayError::unavailable(
                "bus",
                "injected failure",
            ));
        }
        self.published.lock().push(message.clone());
        Ok(())
    }
}
