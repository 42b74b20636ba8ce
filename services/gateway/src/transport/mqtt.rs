//! MQTT transport.
//!
//! Two topic families on one connection: the legacy IoT receiver
//! (`iot/sensors/{sensor_id}/readings`) and the generic receiver
//! (`{domain}/{source_id}/{stream_id}/data`). The network loop only parses
//! and enqueues; persistence happens on a worker pool draining a bounded
//! channel, so a slow backend can never stall the broker connection. When
//! the channel is full the message is dropped with a warning — QoS 1
//! redelivery makes that a retry, not a loss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::{DataPoint, Domain};

use crate::error::{GatewayError, Result};
use crate::pipeline::IngestRouter;
use crate::resilience::{DeadLetterEntry, DeadLetterQueue, DlqCategory};
use crate::time::{now_epoch, parse_iso8601};

use super::{Transport, TransportCounters, TransportStats};

#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub legacy_receiver_enabled: bool,
    pub generic_receiver_enabled: bool,
    pub queue_capacity: usize,
    pub worker_count: usize,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "ingest-gateway".to_string(),
            legacy_receiver_enabled: true,
            generic_receiver_enabled: true,
            queue_capacity: 10_000,
            worker_count: 8,
        }
    }
}

/// Payload on the legacy topic.
#[derive(Debug, serde::Deserialize)]
struct LegacyPayload {
    #[serde(default)]
    sensor_id: Option<i64>,
    value: f64,
    timestamp: String,
    #[serde(default)]
    device_uuid: Option<String>,
}

/// Payload on the generic topic.
#[derive(Debug, serde::Deserialize)]
struct GenericPayload {
    value: f64,
    timestamp: String,
    #[serde(default)]
    metadata: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    sequence: Option<u64>,
}

/// Parse a message into a point based on its topic family.
pub fn parse_message(topic: &str, payload: &[u8]) -> Result<DataPoint> {
    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        ["iot", "sensors", sensor_id, "readings"] => {
            let body: LegacyPayload = serde_json::from_slice(payload)?;
            let topic_id: i64 = sensor_id.parse().map_err(|_| {
                GatewayError::invalid_input("parse", format!("bad sensor id in topic: {topic}"))
            })?;
            // The topic is authoritative; a mismatched body id is a
            // misconfigured device worth rejecting loudly.
            if matches!(body.sensor_id, Some(id) if id != topic_id) {
                return Err(GatewayError::invalid_input(
                    "parse",
                    format!("sensor id mismatch: topic {topic_id}, body {:?}", body.sensor_id),
                ));
            }
            let ts = parse_iso8601(&body.timestamp).ok_or_else(|| {
                GatewayError::invalid_input("parse", format!("bad timestamp {:?}", body.timestamp))
            })?;
            let mut point = DataPoint::legacy(topic_id, body.value, ts);
            if let Some(device) = body.device_uuid {
                point
                    .metadata
                    .insert("device_uuid".to_string(), serde_json::Value::String(device));
            }
            Ok(point)
        }
        [domain, source_id, stream_id, "data"] => {
            let domain = Domain::parse(domain).ok_or_else(|| {
                GatewayError::invalid_input("parse", format!("unknown domain in topic: {topic}"))
            })?;
            if domain.is_legacy() {
                return Err(GatewayError::invalid_input(
                    "invalid_domain",
                    "domain \"iot\" is reserved for the legacy receiver",
                ));
            }
            let body: GenericPayload = serde_json::from_slice(payload)?;
            let ts = parse_iso8601(&body.timestamp).ok_or_else(|| {
                GatewayError::invalid_input("parse", format!("bad timestamp {:?}", body.timestamp))
            })?;
            let mut point = DataPoint::from_parts(domain, source_id, stream_id, body.value, ts);
            point.metadata = body.metadata;
            point.sequence = body.sequence;
            Ok(point)
        }
        _ => Err(GatewayError::invalid_input(
            "parse",
            format!("unroutable topic: {topic}"),
        )),
    }
}

pub struct MqttTransport {
    config: MqttTransportConfig,
    router: Arc<IngestRouter>,
    dlq: Arc<DeadLetterQueue>,
    counters: Arc<TransportCounters>,
    client: Mutex<Option<AsyncClient>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(
        config: MqttTransportConfig,
        router: Arc<IngestRouter>,
        dlq: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            config,
            router,
            dlq,
            counters: Arc::new(TransportCounters::new()),
            client: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn start(&self) -> Result<()> {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        if self.config.legacy_receiver_enabled {
            client
                .subscribe("iot/sensors/+/readings", QoS::AtLeastOnce)
                .await
                .map_err(|e| GatewayError::unavailable("mqtt", e.to_string()))?;
        }
        if self.config.generic_receiver_enabled {
            client
                .subscribe("+/+/+/data", QoS::AtLeastOnce)
                .await
                .map_err(|e| GatewayError::unavailable("mqtt", e.to_string()))?;
        }
        *self.client.lock().await = Some(client);
        info!(
            host = %self.config.host,
            port = self.config.port,
            "MQTT transport connecting"
        );

        let (tx, rx) = mpsc::channel::<DataPoint>(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = self.handles.lock().await;

        // Network loop: parse and enqueue only. No persistence here.
        let counters = self.counters.clone();
        let dlq = self.dlq.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        counters
                            .received
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        match parse_message(&publish.topic, &publish.payload) {
                            Ok(point) => {
                                if let Err(e) = tx.try_send(point) {
                                    counters
                                        .rejected
                                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                                    warn!(
                                        topic = %publish.topic,
                                        error = %e,
                                        "MQTT queue full, message dropped"
                                    );
                                }
                            }
                            Err(e) => {
                                counters
                                    .rejected
                                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                                debug!(topic = %publish.topic, error = %e, "unparseable MQTT message");
                                dlq.push(DeadLetterEntry {
                                    transport: "mqtt".to_string(),
                                    raw: String::from_utf8_lossy(&publish.payload).into_owned(),
                                    category: DlqCategory::Parse,
                                    detail: e.to_string(),
                                    first_failed_at: now_epoch(),
                                    attempts: 0,
                                    msg_id: None,
                                })
                                .await;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT event loop error, reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));

        // Worker pool draining the bounded channel into the router.
        for worker in 0..self.config.worker_count {
            let rx = rx.clone();
            let router = self.router.clone();
            let counters = self.counters.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let point = { rx.lock().await.recv().await };
                    let Some(point) = point else { break };
                    let _guard = super::InFlight::enter(&counters);
                    match router.route(point, "mqtt").await {
                        Ok(_) => {
                            counters
                                .accepted
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        Err(e) if e.kind() == crate::error::ErrorKind::Duplicate => {
                            counters
                                .accepted
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters
                                .rejected
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            debug!(worker, error = %e, "MQTT point rejected");
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        for handle in self.handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("MQTT transport stopped");
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}
