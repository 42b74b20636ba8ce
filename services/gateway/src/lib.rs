//! # Ingest Gateway
//!
//! Multi-transport, multi-domain time-series ingestion gateway. Producers
//! push points over MQTT, HTTP, WebSocket, or CSV upload; every point is
//! normalized into one contract, classified against per-series constraints,
//! routed into exactly one of three sub-pipelines (alert / warning /
//! prediction), persisted to the backend its domain selects, and — when
//! clean — published to the prediction bus.
//!
//! ## Module map
//!
//! - [`classify`]: the pure classifier, delta-spike detection, debounce and
//!   cooldown bookkeeping, and the operational state machine.
//! - [`repository`]: read-through caches over per-series configuration and
//!   state, write-through on state transitions.
//! - [`resilience`]: dedup, dead-letter queue, bounded retry, and circuit
//!   breakers.
//! - [`bus`]: the throttled fire-and-forget prediction publisher.
//! - [`pipeline`]: the three sub-pipelines and the router that feeds them.
//! - [`storage`]: the storage contract, the domain router, and the legacy /
//!   generic / in-memory backends.
//! - [`transport`]: MQTT, HTTP, WebSocket, and CSV adapters.
//! - [`server`]: the warp route tree and health surface.
//!
//! The router is built once with its collaborators and shared immutably;
//! tests construct the same pieces over in-memory backends and a recording
//! bus.

pub mod bus;
pub mod classify;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod repository;
pub mod resilience;
pub mod server;
pub mod storage;
pub mod time;
pub mod transport;

pub use error::{ErrorKind, GatewayError, Result};
pub use metrics::GatewayMetrics;
pub use pipeline::{IngestRouter, RouteOutcome};
