use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use db_pool::PoolMetrics;
use prometheus::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_actix_web::TracingLogger;

use pipeline_service::clients::{KafkaSubscription, PgTransactionStore, RedisCache};
use pipeline_service::handlers::{self, json_config, ServiceInfo};
use pipeline_service::metrics::{HttpMetrics, PipelineMetrics, PrometheusMetrics};
use pipeline_service::middleware::RequestId;
use pipeline_service::runtime::{init_tracing, run_until_shutdown, BackgroundTask};
use pipeline_service::services::EventConsumer;
use pipeline_service::Config;
use redis_utils::RedisPool;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env("consumer").context("Failed to load configuration")?;
    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting consumer"
    );

    let registry = Registry::new();
    let metrics: Arc<dyn PipelineMetrics> = Arc::new(
        PrometheusMetrics::new(&registry).context("Failed to register pipeline metrics")?,
    );

    let db_config = config.database().context("Failed to load database configuration")?;
    db_config.log_config();
    let root = CancellationToken::new();
    let pool_metrics = PoolMetrics::new(&registry).context("Failed to register pool metrics")?;
    let pool = db_pool::create_pool_with_metrics(db_config, pool_metrics, root.child_token())
        .await
        .context("Failed to create database pool")?;
    let store = PgTransactionStore::new(pool);
    store.migrate().await.context("Failed to run database migrations")?;

    let redis = RedisPool::connect(&config.redis.url, config.redis.command_timeout())
        .await
        .context("Failed to connect to Redis")?;

    let subscription =
        KafkaSubscription::subscribe(&config.kafka).context("Failed to subscribe to Kafka")?;

    let consumer = Arc::new(EventConsumer::new(
        Arc::new(RedisCache::new(&redis)),
        Arc::new(store),
        metrics.clone(),
    ));

    let consume_task = BackgroundTask::spawn("event-consumer", &root, {
        let consumer = consumer.clone();
        move |cancel| async move { consumer.run(subscription, cancel).await }
    });

    let consumer = web::Data::from(consumer);
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
            .app_data(consumer.clone())
            .configure(handlers::configure_common)
            .configure(handlers::consumer::configure)
    })
    .disable_signals()
    .bind(bind_address)
    .context("Failed to bind HTTP server")?
    .run();

    run_until_shutdown(
        server,
        Some(consume_task),
        root,
        config.service.shutdown_grace(),
    )
    .await?;

    info!("Consumer stopped");
    Ok(())
}
