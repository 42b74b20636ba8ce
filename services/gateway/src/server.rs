//! HTTP/WebSocket server.
//!
//! Composes the ingest surface, the health endpoints, and the resilience
//! snapshot into one warp route tree and serves it. All state is cloned
//! `Arc`s; the server owns nothing the rest of the gateway does not.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BufMut;
use futures_util::TryStreamExt;
use tracing::info;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::{self, Reply, Response};
use warp::Filter;

use crate::error::{GatewayError, Result};
use crate::pipeline::IngestRouter;
use crate::resilience::{DeadLetterQueue, Deduplicator};
use crate::storage::{DomainStorageRouter, HealthStatus};
use crate::transport::http::{
    error_response, handle_bulk, handle_csv_job, handle_csv_upload, handle_packets,
    handle_reading, handle_universal, AuthHeaders, CsvUpload, HttpTransport,
};
use crate::transport::{ws_route, Transport, WsTransport};

const MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;

fn with<T: Clone + Send>(value: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

pub struct GatewayServer {
    pub http: Arc<HttpTransport>,
    pub ws: Arc<WsTransport>,
    pub mqtt: Option<Arc<dyn Transport>>,
    pub storage: Arc<DomainStorageRouter>,
    pub router: Arc<IngestRouter>,
    pub dedup: Arc<Deduplicator>,
    pub dlq: Arc<DeadLetterQueue>,
}

impl GatewayServer {
    pub fn routes(&self) -> warp::filters::BoxedFilter<(Response,)> {
        let http = self.http.clone();

        let packets = warp::path!("ingest" / "packets")
            .and(warp::post())
            .and(with(http.clone()))
            .and(warp::header::optional::<String>("x-device-key"))
            .and(warp::header::optional::<String>("x-api-key"))
            .and(warp::body::json())
            .then(
                |state, device_key, api_key, body| async move {
                    handle_packets(
                        state,
                        AuthHeaders {
                            device_key,
                            api_key,
                        },
                        body,
                    )
                    .await
                },
            );

        let reading = warp::path!("ingest" / "readings")
            .and(warp::post())
            .and(with(http.clone()))
            .and(warp::body::json())
            .then(|state, body| async move { handle_reading(state, body).await });

        let bulk = warp::path!("ingest" / "readings" / "bulk")
            .and(warp::post())
            .and(with(http.clone()))
            .and(warp::body::json())
            .then(|state, body| async move { handle_bulk(state, body).await });

        let universal = warp::path!("ingest" / "data")
            .and(warp::post())
            .and(with(http.clone()))
            .and(warp::body::json())
            .then(|state, body| async move { handle_universal(state, body).await });

        let csv_upload = warp::path!("ingest" / "csv")
            .and(warp::post())
            .and(with(http.clone()))
            .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
            .then(|state, form: FormData| async move {
                match decode_csv_upload(form).await {
                    Ok(upload) => handle_csv_upload(state, upload).await,
                    Err(e) => error_response(&e),
                }
            });

        let csv_job = warp::path!("ingest" / "csv" / "jobs" / String)
            .and(warp::get())
            .and(with(http.clone()))
            .then(|job_id, state| async move { handle_csv_job(state, job_id).await });

        let storage = self.storage.clone();
        let health = warp::path!("health")
            .and(warp::get())
            .and(with(storage.clone()))
            .then(|storage: Arc<DomainStorageRouter>| async move {
                let backends = storage.health().await;
                let status = aggregate_status(backends.values().map(|h| h.status));
                reply::json(&serde_json::json!({
                    "status": status,
                    "details": backends,
                }))
                .into_response()
            });

        let health_backend = warp::path!("health" / String)
            .and(warp::get())
            .and(with(storage))
            .then(|name: String, storage: Arc<DomainStorageRouter>| async move {
                match storage.backend_by_name(&name) {
                    Some(backend) => {
                        let health = backend.health().await;
                        let status = aggregate_status(std::iter::once(health.status));
                        reply::json(&serde_json::json!({
                            "status": status,
                            "details": health,
                        }))
                        .into_response()
                    }
                    None => reply::with_status(
                        reply::json(&serde_json::json!({ "reason": "unknown_backend" })),
                        StatusCode::NOT_FOUND,
                    )
                    .into_response(),
                }
            });

        let dedup = self.dedup.clone();
        let dlq = self.dlq.clone();
        let router = self.router.clone();
        let resilience = warp::path!("resilience" / "health")
            .and(warp::get())
            .and(with((dedup, dlq, router)))
            .then(
                |(dedup, dlq, router): (
                    Arc<Deduplicator>,
                    Arc<DeadLetterQueue>,
                    Arc<IngestRouter>,
                )| async move {
                    reply::json(&serde_json::json!({
                        "dedup": dedup.health(),
                        "dlq": dlq.health().await,
                        "breakers": router.breaker_snapshots(),
                    }))
                    .into_response()
                },
            );

        let ws = self.ws.clone();
        let mqtt = self.mqtt.clone();
        let router = self.router.clone();
        let stats = warp::path!("ingest" / "stats")
            .and(warp::get())
            .and(with((http, ws, mqtt, router)))
            .then(
                |(http, ws, mqtt, router): (
                    Arc<HttpTransport>,
                    Arc<WsTransport>,
                    Option<Arc<dyn Transport>>,
                    Arc<IngestRouter>,
                )| async move {
                    let mut transports = HashMap::new();
                    transports.insert("http", http.stats());
                    transports.insert("csv", http.csv_stats());
                    transports.insert("websocket", ws.stats());
                    if let Some(mqtt) = mqtt {
                        transports.insert("mqtt", mqtt.stats());
                    }
                    reply::json(&serde_json::json!({
                        "router": router.metrics().snapshot(),
                        "transports": transports,
                    }))
                    .into_response()
                },
            );

        packets
            .or(reading)
            .unify()
            .or(bulk)
            .unify()
            .or(universal)
            .unify()
            .or(csv_upload)
            .unify()
            .or(csv_job)
            .unify()
            .or(ws_route(self.ws.clone()))
            .unify()
            .or(health_backend)
            .unify()
            .or(health)
            .unify()
            .or(resilience)
            .unify()
            .or(stats)
            .unify()
            .boxed()
    }

    pub async fn serve(self, addr: SocketAddr) {
        info!(%addr, "gateway HTTP server listening");
        warp::serve(self.routes()).run(addr).await;
    }
}

fn aggregate_status<I: Iterator<Item = HealthStatus>>(statuses: I) -> &'static str {
    let mut any_down = false;
    let mut all_down = true;
    let mut any = false;
    for status in statuses {
        any = true;
        match status {
            HealthStatus::Ok => all_down = false,
            HealthStatus::Degraded => {
                any_down = true;
                all_down = false;
            }
            HealthStatus::Down => any_down = true,
        }
    }
    if !any || (any_down && all_down) {
        "down"
    } else if any_down {
        "degraded"
    } else {
        "ok"
    }
}

/// Pull the file and form fields out of a multipart upload.
async fn decode_csv_upload(mut form: FormData) -> Result<CsvUpload> {
    let mut upload = CsvUpload::default();
    while let Some(part) = form
        .try_next()
        .await
        .map_err(|e| GatewayError::invalid_input("parse", e.to_string()))?
    {
        let name = part.name().to_string();
        let data = part
            .stream()
            .try_fold(Vec::new(), |mut acc, mut buf| {
                acc.put(&mut buf);
                async move { Ok(acc) }
            })
            .await
            .map_err(|e| GatewayError::invalid_input("parse", e.to_string()))?;

        match name.as_str() {
            "file" => upload.file = data,
            "domain" => upload.domain = Some(String::from_utf8_lossy(&data).into_owned()),
            "source_id" => upload.source_id = Some(String::from_utf8_lossy(&data).into_owned()),
            "timestamp_column" => {
                upload.timestamp_column = Some(String::from_utf8_lossy(&data).into_owned())
            }
            "value_columns" | "value_columns[]" => {
                let text = String::from_utf8_lossy(&data);
                upload.value_columns.extend(
                    text.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                );
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }
    Ok(upload)
}
