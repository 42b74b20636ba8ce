//! Transport adapters.
//!
//! Every adapter parses its native payloads into [`types::DataPoint`] and
//! hands them to the shared router; nothing downstream knows which wire a
//! point arrived on. Adapters own their concurrency control: each applies a
//! bounded in-flight limit and surfaces excess as transport-native
//! backpressure (HTTP 429, WebSocket close 1013, MQTT drop-with-warning,
//! CSV pause).

pub mod csv;
pub mod http;
pub mod mqtt;
pub mod websocket;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use csv::{CsvJobRegistry, CsvJobStatus};
pub use http::{DeviceResolver, HttpTransport};
pub use mqtt::MqttTransport;
pub use websocket::{ws_route, WsTransport};

/// Lifecycle and introspection contract shared by all adapters.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start background tasks; returns once the adapter is running.
    async fn start(&self) -> Result<()>;

    /// Stop gracefully: drain what is in flight, drop the rest.
    async fn stop(&self) -> Result<()>;

    fn stats(&self) -> TransportStats;
}

/// Point-in-time adapter counters for the stats surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub in_flight: i64,
}

/// Shared atomic counters behind [`TransportStats`].
#[derive(Debug, Default)]
pub struct TransportCounters {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub in_flight: AtomicI64,
}

impl TransportCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// RAII in-flight counter bump.
pub(crate) struct InFlight<'a>(&'a TransportCounters);

impl<'a> InFlight<'a> {
    pub(crate) fn enter(counters: &'a TransportCounters) -> Self {
        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
