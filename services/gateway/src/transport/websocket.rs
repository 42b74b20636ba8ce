//! WebSocket streaming transport.
//!
//! `ws://…/ingest/stream`: a connect handshake, then data frames batched by
//! the client, each answered with an ack carrying the cumulative sequence
//! and the per-batch rejects. Policy violations close with 1008; a batch
//! larger than the in-flight limit closes with 1013 (try again later).

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::{DataPoint, Domain};
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::error::{ErrorKind, Result};
use crate::pipeline::IngestRouter;
use crate::time::now_epoch;

use super::{Transport, TransportCounters, TransportStats};

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Connect {
        source_id: String,
        domain: String,
        #[serde(default)]
        api_key: Option<String>,
    },
    Data {
        batch: Vec<WsPoint>,
    },
}

#[derive(Debug, Deserialize)]
struct WsPoint {
    stream_id: String,
    value: f64,
    timestamp: f64,
    #[serde(default)]
    sequence: Option<u64>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Connected {
        session_id: String,
    },
    Ack {
        sequence_up_to: u64,
        rejected: Vec<RejectedPoint>,
    },
}

#[derive(Debug, Serialize)]
struct RejectedPoint {
    index: usize,
    reason: &'static str,
}

/// Stats-only transport handle; sessions run inside the warp server.
pub struct WsTransport {
    pub counters: Arc<TransportCounters>,
    pub router: Arc<IngestRouter>,
    pub max_in_flight: usize,
    pub auth_required: bool,
    pub enabled: bool,
}

impl WsTransport {
    pub fn new(
        router: Arc<IngestRouter>,
        max_in_flight: usize,
        auth_required: bool,
        enabled: bool,
    ) -> Self {
        Self {
            counters: Arc::new(TransportCounters::new()),
            router,
            max_in_flight,
            auth_required,
            enabled,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn start(&self) -> Result<()> {
        info!("WebSocket transport ready");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

/// The `/ingest/stream` upgrade route.
pub fn ws_route(
    state: Arc<WsTransport>,
) -> warp::filters::BoxedFilter<(warp::reply::Response,)> {
    warp::path!("ingest" / "stream")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let state = state.clone();
            if !state.enabled {
                return warp::reply::Reply::into_response(warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({ "reason": "websocket_disabled" })),
                    warp::http::StatusCode::FORBIDDEN,
                ));
            }
            warp::reply::Reply::into_response(
                ws.on_upgrade(move |socket| handle_session(state, socket)),
            )
        })
        .boxed()
}

async fn handle_session(state: Arc<WsTransport>, socket: WebSocket) {
    let (mut tx, mut rx) = socket.split();

    // Handshake: the first frame must be a connect.
    let session = loop {
        let Some(Ok(message)) = rx.next().await else {
            return;
        };
        if message.is_ping() || message.is_pong() {
            continue;
        }
        let Ok(text) = message.to_str() else {
            let _ = tx
                .send(Message::close_with(CLOSE_POLICY_VIOLATION, "expected text frame"))
                .await;
            return;
        };
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(ClientFrame::Connect {
                source_id,
                domain,
                api_key,
            }) => break (source_id, domain, api_key),
            _ => {
                let _ = tx
                    .send(Message::close_with(CLOSE_POLICY_VIOLATION, "expected connect frame"))
                    .await;
                return;
            }
        }
    };

    let (source_id, domain_str, api_key) = session;
    let Some(domain) = Domain::parse(&domain_str) else {
        let _ = tx
            .send(Message::close_with(CLOSE_POLICY_VIOLATION, "unknown domain"))
            .await;
        return;
    };
    if domain.is_legacy() {
        let _ = tx
            .send(Message::close_with(CLOSE_POLICY_VIOLATION, "invalid_domain"))
            .await;
        return;
    }
    if state.auth_required && api_key.as_deref().map(str::is_empty).unwrap_or(true) {
        let _ = tx
            .send(Message::close_with(CLOSE_POLICY_VIOLATION, "missing api key"))
            .await;
        return;
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let connected = serde_json::to_string(&ServerFrame::Connected {
        session_id: session_id.clone(),
    })
    .expect("serializable frame");
    if tx.send(Message::text(connected)).await.is_err() {
        return;
    }
    info!(session_id = %session_id, source_id = %source_id, domain = %domain, "WebSocket session connected");

    let mut sequence_up_to: u64 = 0;
    while let Some(message) = rx.next().await {
        let Ok(message) = message else { break };
        if message.is_close() {
            break;
        }
        if !message.is_text() {
            continue;
        }
        let Ok(text) = message.to_str() else { continue };

        let batch = match serde_json::from_str::<ClientFrame>(text) {
            Ok(ClientFrame::Data { batch }) => batch,
            Ok(ClientFrame::Connect { .. }) => {
                warn!(session_id = %session_id, "connect frame after handshake");
                continue;
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "unparseable frame");
                continue;
            }
        };

        // Backpressure: refuse batches the session cannot absorb.
        if batch.len() > state.max_in_flight {
            let _ = tx
                .send(Message::close_with(CLOSE_TRY_AGAIN_LATER, "in-flight limit exceeded"))
                .await;
            break;
        }

        let mut rejected = Vec::new();
        for (index, ws_point) in batch.into_iter().enumerate() {
            state
                .counters
                .received
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let mut point = DataPoint::from_parts(
                domain,
                &source_id,
                &ws_point.stream_id,
                ws_point.value,
                ws_point.timestamp,
            );
            point.sequence = ws_point.sequence;
            point.metadata = ws_point.metadata;
            point.ingested_at = Some(now_epoch());

            let _guard = super::InFlight::enter(&state.counters);
            match state.router.route(point, "websocket").await {
                Ok(_) => {
                    state
                        .counters
                        .accepted
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    sequence_up_to += 1;
                }
                Err(e) if e.kind() == ErrorKind::Duplicate => {
                    state
                        .counters
                        .accepted
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    sequence_up_to += 1;
                }
                Err(e) => {
                    state
                        .counters
                        .rejected
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    rejected.push(RejectedPoint {
                        index,
                        reason: e.reason_code(),
                    });
                }
            }
        }

        let ack = serde_json::to_string(&ServerFrame::Ack {
            sequence_up_to,
            rejected,
        })
        .expect("serializable frame");
        if tx.send(Message::text(ack)).await.is_err() {
            break;
        }
    }

    debug!(session_id = %session_id, "WebSocket session closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let connect: ClientFrame = serde_json::from_str(
            r#"{"type":"connect","source_id":"s1","domain":"finance","api_key":"k"}"#,
        )
        .unwrap();
        assert!(matches!(connect, ClientFrame::Connect { .. }));

        let data: ClientFrame = serde_json::from_str(
            r#"{"type":"data","batch":[{"stream_id":"price","value":1.5,"timestamp":100.0}]}"#,
        )
        .unwrap();
        match data {
            ClientFrame::Data { batch } => assert_eq!(batch.len(), 1),
            _ => panic!("expected data frame"),
        }
    }

    #[test]
    fn server_frames_serialize_with_type_tags() {
        let ack = serde_json::to_value(ServerFrame::Ack {
            sequence_up_to: 12,
            rejected: vec![RejectedPoint {
                index: 3,
                reason: "guards_failed",
            }],
        })
        .unwrap();
        assert_eq!(ack["type"], "ack");
        assert_eq!(ack["sequence_up_to"], 12);
        assert_eq!(ack["rejected"][0]["index"], 3);

        let connected = serde_json::to_value(ServerFrame::Connected {
            session_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(connected["type"], "connected");
    }
}
