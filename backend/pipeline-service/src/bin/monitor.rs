use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use db_pool::PoolMetrics;
use prometheus::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_actix_web::TracingLogger;

use pipeline_service::clients::{
    CachePingProbe, EventCache, KafkaHealthProbe, PgHealthProbe, PgTransactionStore, RedisCache,
};
use pipeline_service::handlers::{self, json_config, ServiceInfo};
use pipeline_service::metrics::{HttpMetrics, PipelineMetrics, PrometheusMetrics};
use pipeline_service::middleware::RequestId;
use pipeline_service::runtime::{init_tracing, run_until_shutdown, BackgroundTask};
use pipeline_service::services::{HealthMonitor, MonitorProbes};
use pipeline_service::Config;
use redis_utils::RedisPool;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env("monitor").context("Failed to load configuration")?;
    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        interval_secs = config.monitor.interval_secs,
        "Starting monitor"
    );

    let registry = Registry::new();
    let metrics: Arc<dyn PipelineMetrics> = Arc::new(
        PrometheusMetrics::new(&registry).context("Failed to register pipeline metrics")?,
    );

    let db_config = config.database().context("Failed to load database configuration")?;
    db_config.log_config();
    let health_db_config = db_config.for_health_checks();

    let root = CancellationToken::new();
    let pool_metrics = PoolMetrics::new(&registry).context("Failed to register pool metrics")?;
    let pool = db_pool::create_pool_with_metrics(db_config, pool_metrics, root.child_token())
        .await
        .context("Failed to create database pool")?;
    let store = PgTransactionStore::new(pool);
    store.migrate().await.context("Failed to run database migrations")?;

    // Probes run on their own small pool so a saturated data pool still
    // reports accurately.
    let health_pool = db_pool::create_pool(health_db_config)
        .await
        .context("Failed to create health-check database pool")?;

    let redis = RedisPool::connect(&config.redis.url, config.redis.command_timeout())
        .await
        .context("Failed to connect to Redis")?;
    let cache: Arc<dyn EventCache> = Arc::new(RedisCache::new(&redis));

    let broker_probe = KafkaHealthProbe::new(&config.kafka.brokers, config.monitor.probe_timeout())
        .context("Failed to create Kafka health-check client")?;

    let probes = MonitorProbes {
        broker: Arc::new(broker_probe),
        cache: Arc::new(CachePingProbe::new(cache)),
        store: Arc::new(PgHealthProbe::new(health_pool)),
    };

    let monitor = Arc::new(HealthMonitor::new(
        probes,
        Arc::new(store),
        metrics.clone(),
        config.monitor.interval(),
        config.monitor.probe_timeout(),
    ));

    let monitor_task = BackgroundTask::spawn("health-monitor", &root, {
        let monitor = monitor.clone();
        move |cancel| async move { monitor.run(cancel).await }
    });

    let monitor = web::Data::from(monitor);
    let registry = web::Data::new(registry);
    let service_info = web::Data::new(ServiceInfo::new(config.service.name.clone()));

    let bind_address = config.service.bind_address();
    info!("Starting HTTP server on {}:{}", bind_address.0, bind_address.1);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(HttpMetrics::new(metrics.clone()))
            .wrap(Cors::permissive())
            .wrap(TracingLogger::default())
            .wrap(RequestId::new())
            .app_data(json_config())
            .app_data(registry.clone())
            .app_data(service_info.clone())
            .app_data(monitor.clone())
            .configure(handlers::configure_common)
            .configure(handlers::monitor::configure)
    })
    .disable_signals()
    .bind(bind_address)
    .context("Failed to bind HTTP server")?
    .run();

    run_until_shutdown(
        server,
        Some(monitor_task),
        root,
        config.service.shutdown_grace(),
    )
    .await?;

    info!("Monitor stopped");
    Ok(())
}
