//! HTTP ingest surface.
//!
//! Legacy endpoints keyed by integer sensor id (packets, readings, bulk), a
//! generic batch endpoint, and the CSV upload entry point. Error kinds map
//! onto status codes (400 / 200 / 503 / 429 / 500) with a short machine
//! reason; details stay in the logs, never in the response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use types::{DataPoint, Domain};
use warp::http::StatusCode;
use warp::reply::{self, Reply, Response};

use crate::error::{ErrorKind, GatewayError, Result};
use crate::pipeline::{IngestRouter, RouteOutcome};
use crate::storage::SeriesStore;
use crate::time::now_epoch;
use crate::transport::csv::{spawn_job, CsvJobParams, CsvJobRegistry};

use super::{Transport, TransportCounters, TransportStats};

// ============================================================================
// REQUEST / RESPONSE BODIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PacketReading {
    pub sensor_uuid: String,
    pub value: f64,
    #[serde(default)]
    pub ts: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PacketRequest {
    pub device_uuid: String,
    pub readings: Vec<PacketReading>,
}

#[derive(Debug, Serialize)]
pub struct PacketResponse {
    pub inserted: u64,
    pub unknown_sensors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadingRequest {
    pub sensor_id: i64,
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub readings: Vec<ReadingRequest>,
}

#[derive(Debug, Serialize)]
pub struct InsertedResponse {
    pub inserted: u64,
}

#[derive(Debug, Deserialize)]
pub struct UniversalPoint {
    pub stream_id: String,
    pub value: f64,
    pub timestamp: f64,
    #[serde(default)]
    pub stream_type: Option<String>,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UniversalRequest {
    pub source_id: String,
    pub domain: String,
    pub data_points: Vec<UniversalPoint>,
}

#[derive(Debug, Serialize)]
pub struct PointResult {
    pub stream_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<&'static str>,
    pub reason: &'static str,
}

// ============================================================================
// DEVICE RESOLUTION
// ============================================================================

/// Cached `(device_uuid, sensor_uuid) -> sensor_id` membership lookup
/// against the legacy backend. Misses are cached too: an unknown sensor
/// stays unknown for the TTL instead of hammering the database.
pub struct DeviceResolver {
    store: Arc<dyn SeriesStore>,
    cache: DashMap<(String, String), (Option<i64>, Instant)>,
    ttl: Duration,
}

impl DeviceResolver {
    pub fn new(store: Arc<dyn SeriesStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub async fn resolve(&self, device_uuid: &str, sensor_uuid: &str) -> Result<Option<i64>> {
        let key = (device_uuid.to_string(), sensor_uuid.to_string());
        if let Some(cached) = self.cache.get(&key) {
            let (id, at) = *cached;
            if at.elapsed() < self.ttl {
                return Ok(id);
            }
        }
        let id = self.store.resolve_sensor(device_uuid, sensor_uuid).await?;
        self.cache.insert(key, (id, Instant::now()));
        Ok(id)
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

pub struct HttpTransport {
    pub router: Arc<IngestRouter>,
    pub jobs: Arc<CsvJobRegistry>,
    pub resolver: Arc<DeviceResolver>,
    counters: Arc<TransportCounters>,
    csv_counters: Arc<TransportCounters>,
    limiter: Arc<Semaphore>,
    device_auth_enabled: bool,
    csv_enabled: bool,
}

impl HttpTransport {
    pub fn new(
        router: Arc<IngestRouter>,
        resolver: Arc<DeviceResolver>,
        max_in_flight: usize,
        device_auth_enabled: bool,
        csv_enabled: bool,
    ) -> Self {
        Self {
            router,
            jobs: Arc::new(CsvJobRegistry::new()),
            resolver,
            counters: Arc::new(TransportCounters::new()),
            csv_counters: Arc::new(TransportCounters::new()),
            limiter: Arc::new(Semaphore::new(max_in_flight)),
            device_auth_enabled,
            csv_enabled,
        }
    }

    pub fn csv_stats(&self) -> TransportStats {
        self.csv_counters.snapshot()
    }

    fn record_outcome(&self, outcome: &std::result::Result<RouteOutcome, GatewayError>) {
        match outcome {
            Ok(_) => {
                self.counters
                    .accepted
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(e) if e.kind() == ErrorKind::Duplicate => {
                self.counters
                    .accepted
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(_) => {
                self.counters
                    .rejected
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    fn received(&self, n: u64) {
        self.counters
            .received
            .fetch_add(n, std::sync::atomic::Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn start(&self) -> Result<()> {
        // Serving is owned by the warp server; the adapter itself has no
        // background tasks to start.
        info!("HTTP transport ready");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

// ============================================================================
// REPLY HELPERS
// ============================================================================

pub fn error_response(e: &GatewayError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    reply::with_status(
        reply::json(&serde_json::json!({ "reason": e.reason_code() })),
        status,
    )
    .into_response()
}

fn throttled_response() -> Response {
    error_response(&GatewayError::Throttled {
        scope: "http".to_string(),
    })
}

fn unauthorized_response() -> Response {
    reply::with_status(
        reply::json(&serde_json::json!({ "reason": "unauthorized" })),
        StatusCode::UNAUTHORIZED,
    )
    .into_response()
}

/// Auth headers accepted on the legacy packet path.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    pub device_key: Option<String>,
    pub api_key: Option<String>,
}

impl AuthHeaders {
    fn present(&self) -> bool {
        self.device_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
            || self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn handle_packets(
    state: Arc<HttpTransport>,
    auth: AuthHeaders,
    request: PacketRequest,
) -> Response {
    if state.device_auth_enabled && !auth.present() {
        return unauthorized_response();
    }
    let Ok(_permit) = state.limiter.clone().try_acquire_owned() else {
        return throttled_response();
    };
    let _in_flight = super::InFlight::enter(&state.counters);

    let now = now_epoch();
    let mut inserted = 0u64;
    let mut unknown = Vec::new();
    for reading in &request.readings {
        state.received(1);
        let sensor_id = match state
            .resolver
            .resolve(&request.device_uuid, &reading.sensor_uuid)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => {
                state
                    .counters
                    .rejected
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                unknown.push(reading.sensor_uuid.clone());
                continue;
            }
            Err(e) => return error_response(&e),
        };

        let point = DataPoint::legacy(sensor_id, reading.value, reading.ts.unwrap_or(now));
        let outcome = state.router.route(point, "http").await;
        state.record_outcome(&outcome);
        match outcome {
            Ok(_) => inserted += 1,
            Err(e) if e.kind() == ErrorKind::Duplicate => {}
            Err(e) if e.kind() == ErrorKind::InvalidInput => {
                debug!(sensor_uuid = %reading.sensor_uuid, error = %e, "packet reading rejected");
            }
            Err(e) => return error_response(&e),
        }
    }

    reply::json(&PacketResponse {
        inserted,
        unknown_sensors: unknown,
    })
    .into_response()
}

pub async fn handle_reading(state: Arc<HttpTransport>, request: ReadingRequest) -> Response {
    let Ok(_permit) = state.limiter.clone().try_acquire_owned() else {
        return throttled_response();
    };
    let _in_flight = super::InFlight::enter(&state.counters);
    state.received(1);

    let point = DataPoint::legacy(
        request.sensor_id,
        request.value,
        request.timestamp.unwrap_or_else(now_epoch),
    );
    let outcome = state.router.route(point, "http").await;
    state.record_outcome(&outcome);
    match outcome {
        Ok(_) => reply::json(&InsertedResponse { inserted: 1 }).into_response(),
        Err(e) if e.kind() == ErrorKind::Duplicate => {
            reply::json(&InsertedResponse { inserted: 0 }).into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn handle_bulk(state: Arc<HttpTransport>, request: BulkRequest) -> Response {
    let Ok(_permit) = state.limiter.clone().try_acquire_owned() else {
        return throttled_response();
    };
    let _in_flight = super::InFlight::enter(&state.counters);

    let mut inserted = 0u64;
    for reading in &request.readings {
        state.received(1);
        let point = DataPoint::legacy(
            reading.sensor_id,
            reading.value,
            reading.timestamp.unwrap_or_else(now_epoch),
        );
        let outcome = state.router.route(point, "http").await;
        state.record_outcome(&outcome);
        match outcome {
            Ok(_) => inserted += 1,
            Err(e) if e.kind() == ErrorKind::Unavailable => return error_response(&e),
            Err(_) => {}
        }
    }
    reply::json(&InsertedResponse { inserted }).into_response()
}

pub async fn handle_universal(state: Arc<HttpTransport>, request: UniversalRequest) -> Response {
    let Some(domain) = Domain::parse(&request.domain) else {
        return error_response(&GatewayError::invalid_input(
            "invalid_domain",
            format!("unknown domain {:?}", request.domain),
        ));
    };
    if domain.is_legacy() {
        return error_response(&GatewayError::invalid_input(
            "invalid_domain",
            "domain \"iot\" is reserved for the legacy endpoints",
        ));
    }
    let Ok(_permit) = state.limiter.clone().try_acquire_owned() else {
        return throttled_response();
    };
    let _in_flight = super::InFlight::enter(&state.counters);

    let mut results = Vec::with_capacity(request.data_points.len());
    for dp in &request.data_points {
        state.received(1);
        let mut point =
            DataPoint::from_parts(domain, &request.source_id, &dp.stream_id, dp.value, dp.timestamp);
        point.stream_type = dp.stream_type.clone();
        point.sequence = dp.sequence;
        point.metadata = dp.metadata.clone();

        let outcome = state.router.route(point, "http").await;
        state.record_outcome(&outcome);
        results.push(match outcome {
            Ok(route) => PointResult {
                stream_id: dp.stream_id.clone(),
                status: "accepted",
                classification: Some(route.classification.as_str()),
                reason: route.reason.as_str(),
            },
            Err(e) if e.kind() == ErrorKind::Duplicate => PointResult {
                stream_id: dp.stream_id.clone(),
                status: "duplicate",
                classification: None,
                reason: "duplicate",
            },
            Err(e) => PointResult {
                stream_id: dp.stream_id.clone(),
                status: "rejected",
                classification: None,
                reason: e.reason_code(),
            },
        });
    }

    reply::json(&results).into_response()
}

/// Decoded multipart upload, assembled by the server's multipart filter.
#[derive(Debug, Default)]
pub struct CsvUpload {
    pub file: Vec<u8>,
    pub domain: Option<String>,
    pub source_id: Option<String>,
    pub timestamp_column: Option<String>,
    pub value_columns: Vec<String>,
}

pub async fn handle_csv_upload(state: Arc<HttpTransport>, upload: CsvUpload) -> Response {
    if !state.csv_enabled {
        return error_response(&GatewayError::invalid_input(
            "csv_disabled",
            "CSV ingest is disabled",
        ));
    }
    let Some(domain) = upload.domain.as_deref().and_then(Domain::parse) else {
        return error_response(&GatewayError::invalid_input(
            "invalid_domain",
            format!("unknown domain {:?}", upload.domain),
        ));
    };
    if domain.is_legacy() {
        return error_response(&GatewayError::invalid_input(
            "invalid_domain",
            "domain \"iot\" is reserved for the legacy endpoints",
        ));
    }
    let (Some(source_id), Some(timestamp_column)) =
        (upload.source_id.clone(), upload.timestamp_column.clone())
    else {
        return error_response(&GatewayError::invalid_input(
            "parse",
            "source_id and timestamp_column are required",
        ));
    };
    if upload.value_columns.is_empty() {
        return error_response(&GatewayError::invalid_input(
            "parse",
            "at least one value column is required",
        ));
    }
    if upload.file.is_empty() {
        return error_response(&GatewayError::invalid_input("parse", "empty upload"));
    }

    let rows = upload.file.iter().filter(|b| **b == b'\n').count();
    let job_id = spawn_job(
        state.jobs.clone(),
        state.router.clone(),
        state.csv_counters.clone(),
        CsvJobParams {
            domain,
            source_id,
            timestamp_column,
            value_columns: upload.value_columns,
        },
        upload.file,
    );

    reply::json(&serde_json::json!({
        "job_id": job_id,
        "status": "pending",
        "rows": rows,
    }))
    .into_response()
}

pub async fn handle_csv_job(state: Arc<HttpTransport>, job_id: String) -> Response {
    match state.jobs.get(&job_id) {
        Some(status) => reply::json(&status).into_response(),
        None => reply::with_status(
            reply::json(&serde_json::json!({ "reason": "unknown_job" })),
            StatusCode::NOT_FOUND,
        )
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn resolver_caches_hits_and_misses() {
        let store = Arc::new(MemoryStore::new("legacy"));
        store.put_sensor("dev-1", "sens-1", 42);
        let resolver = DeviceResolver::new(store.clone(), Duration::from_secs(300));

        assert_eq!(resolver.resolve("dev-1", "sens-1").await.unwrap(), Some(42));
        assert_eq!(resolver.resolve("dev-1", "nope").await.unwrap(), None);

        // Membership added after the miss was cached: still unknown until
        // the TTL expires.
        store.put_sensor("dev-1", "nope", 43);
        assert_eq!(resolver.resolve("dev-1", "nope").await.unwrap(), None);
    }

    #[test]
    fn auth_header_presence() {
        assert!(!AuthHeaders::default().present());
        assert!(AuthHeaders {
            device_key: Some("k".into()),
            api_key: None
        }
        .present());
        assert!(!AuthHeaders {
            device_key: Some(String::new()),
            api_key: None
        }
        .present());
        assert!(AuthHeaders {
            device_key: None,
            api_key: Some("k".into())
        }
        .present());
    }
}
