//! Gateway entry point.
//!
//! Loads configuration from the environment, wires the core once, starts
//! the enabled transports and the background tasks, and serves until
//! interrupted. Exit codes: 0 clean shutdown, 1 transient startup failure,
//! 2 configuration error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{defaults, GatewayConfig};
use ingest_gateway::bus::{NoopBus, PredictionBus, RedisBus, ThrottledBus};
use ingest_gateway::classify::StaleSweeper;
use ingest_gateway::metrics::GatewayMetrics;
use ingest_gateway::pipeline::IngestRouter;
use ingest_gateway::pipeline::guards::GuardConfig;
use ingest_gateway::repository::SeriesRepository;
use ingest_gateway::resilience::{
    CircuitBreakerConfig, DeadLetterQueue, Deduplicator, DlqConsumer, RetryPolicy,
};
use ingest_gateway::storage::generic::GenericSqlStore;
use ingest_gateway::storage::legacy::LegacySqlStore;
use ingest_gateway::storage::DomainStorageRouter;
use ingest_gateway::transport::http::DeviceResolver;
use ingest_gateway::transport::mqtt::{MqttTransport, MqttTransportConfig};
use ingest_gateway::transport::{HttpTransport, Transport, WsTransport};

const EXIT_TRANSIENT: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(EXIT_CONFIG);
        }
    };

    match run(config).await {
        Ok(()) => {}
        Err(e) => {
            error!(error = %e, "gateway failed to start");
            std::process::exit(EXIT_TRANSIENT);
        }
    }
}

async fn connect_redis(url: &str) -> Option<redis::aio::ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "bad redis URL, resilience stores run in-process");
            return None;
        }
    };
    match client.get_connection_manager().await {
        Ok(manager) => Some(manager),
        Err(e) => {
            warn!(error = %e, "redis unreachable at startup, resilience stores run in-process");
            None
        }
    }
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting ingest gateway");

    // Storage: lazy pools, the gateway boots before the databases do.
    let legacy = Arc::new(
        LegacySqlStore::connect_lazy(&config.legacy_db.url())
            .context("legacy backend pool")?,
    );
    let generic = Arc::new(
        GenericSqlStore::connect_lazy(&config.generic_db_url)
            .context("generic backend pool")?,
    );
    let storage = Arc::new(DomainStorageRouter::new(legacy.clone(), generic));

    let metrics = Arc::new(GatewayMetrics::new());
    let tuning = &config.tuning;

    // Resilience stores share one Redis; in-process fallbacks keep ingest
    // alive when it is absent.
    let redis = connect_redis(&config.redis_url).await;
    let dedup = Arc::new(match redis.clone() {
        Some(conn) => Deduplicator::redis(conn, Duration::from_secs(tuning.dedup_ttl_secs)),
        None => Deduplicator::memory(Duration::from_secs(tuning.dedup_ttl_secs)),
    });
    let dlq = Arc::new(match redis.clone() {
        Some(conn) => DeadLetterQueue::redis(conn, tuning.dlq_max_len),
        None => DeadLetterQueue::memory(tuning.dlq_max_len),
    });

    let bus_conn = if config.bus_url() == config.redis_url {
        redis
    } else {
        connect_redis(config.bus_url()).await
    };
    let publisher: Arc<dyn PredictionBus> = match bus_conn {
        Some(conn) => Arc::new(RedisBus::new(conn)),
        None => Arc::new(NoopBus),
    };
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: tuning.breaker_failure_threshold,
        open_duration: tuning.breaker_open_duration(),
    };
    let bus = Arc::new(ThrottledBus::with_breaker(
        publisher,
        Duration::from_secs_f64(tuning.bus_min_interval_secs),
        metrics.clone(),
        breaker_config,
    ));

    let repo = Arc::new(SeriesRepository::new(
        storage.clone(),
        Duration::from_secs(tuning.cache_ttl_secs),
        defaults::CACHE_CAPACITY,
        tuning.warmup_readings,
    ));

    let router = Arc::new(IngestRouter::new(
        storage.clone(),
        repo.clone(),
        bus,
        dedup.clone(),
        dlq.clone(),
        metrics,
        RetryPolicy {
            max_attempts: tuning.retry_max_attempts,
            base_delay: tuning.retry_base_delay(),
            max_delay: Duration::from_millis(defaults::RETRY_MAX_DELAY_MS),
        },
        breaker_config,
        GuardConfig::default(),
    ));

    // Background tasks.
    tokio::spawn(
        StaleSweeper::new(
            repo,
            Duration::from_secs(tuning.stale_timeout_secs),
            Duration::from_secs(defaults::STALE_SWEEP_INTERVAL_SECS),
        )
        .run(),
    );
    tokio::spawn(
        DlqConsumer::new(
            dlq.clone(),
            router.clone(),
            defaults::DLQ_CONSUMER_BATCH_SIZE,
            Duration::from_secs(defaults::DLQ_CONSUMER_INTERVAL_SECS),
            defaults::DLQ_MAX_REPLAYS,
        )
        .run(),
    );

    // Transports.
    let mqtt: Option<Arc<dyn Transport>> = if config.transports.mqtt_ingest_enabled {
        let transport = Arc::new(MqttTransport::new(
            MqttTransportConfig {
                host: config.mqtt.host.clone(),
                port: config.mqtt.port,
                username: config.mqtt.username.clone(),
                password: config.mqtt.password.clone(),
                client_id: "ingest-gateway".to_string(),
                legacy_receiver_enabled: config.transports.modular_receiver_enabled,
                generic_receiver_enabled: config.transports.generic_mqtt_enabled,
                queue_capacity: defaults::MQTT_QUEUE_CAPACITY,
                worker_count: defaults::MQTT_WORKER_COUNT,
            },
            router.clone(),
            dlq.clone(),
        ));
        transport.start().await.context("MQTT transport")?;
        Some(transport)
    } else {
        info!("MQTT ingest disabled");
        None
    };

    let resolver = Arc::new(DeviceResolver::new(
        legacy,
        Duration::from_secs(defaults::DEVICE_AUTH_CACHE_TTL_SECS),
    ));
    let http = Arc::new(HttpTransport::new(
        router.clone(),
        resolver,
        defaults::HTTP_MAX_IN_FLIGHT,
        config.transports.device_auth_enabled,
        config.transports.csv_enabled,
    ));
    let ws = Arc::new(WsTransport::new(
        router.clone(),
        defaults::WS_MAX_IN_FLIGHT,
        config.transports.device_auth_enabled,
        config.transports.websocket_enabled,
    ));

    let addr: SocketAddr = format!("{}:{}", config.http_bind, config.http_port)
        .parse()
        .context("HTTP bind address")?;

    let server = ingest_gateway::server::GatewayServer {
        http,
        ws: ws.clone(),
        mqtt: mqtt.clone(),
        storage,
        router,
        dedup,
        dlq,
    };

    tokio::select! {
        _ = server.serve(addr) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    if let Some(mqtt) = mqtt {
        let _ = mqtt.stop().await;
    }
    let _ = ws.stop().await;
    info!("gateway stopped");
    Ok(())
}
