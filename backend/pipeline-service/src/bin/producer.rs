use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use prometheus::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_actix_web::TracingLogger;

use pipeline_service::clients::{KafkaPublisher, RedisCache};
use pipeline_service::handlers::{self, json_config, ServiceInfo};
use pipeline_service::metrics::{HttpMetrics, PipelineMetrics, PrometheusMetrics};
use pipeline_service::middleware::RequestId;
use pipeline_service::runtime::{init_tracing, run_until_shutdown};
use pipeline_service::services::EventProducer;
use pipeline_service::Config;
use redis_utils::RedisPool;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env("producer").context("Failed to load configuration")?;
    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting producer"
    );

    let registry = Registry::new();
    let metrics: Arc<dyn PipelineMetrics> = Arc::new(
        PrometheusMetrics::new(&registry).context("Failed to register pipeline metrics")?,
    );

    let redis = RedisPool::connect(&config.redis.url, config.redis.command_timeout())
        .await
        .context("Failed to connect to Redis")?;
    let cache = Arc::new(RedisCache::new(&redis));

    let publisher =
        Arc::new(KafkaPublisher::new(&config.kafka).context("Failed to create Kafka producer")?);

    let producer = web::Data::new(EventProducer::new(
        publisher,
        cache,
        metrics.clone(),
        config.kafka.topic.clone(),
    ));
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
            .app_data(producer.clone())
            .configure(handlers::configure_common)
            .configure(handlers::producer::configure)
    })
    .disable_signals()
    .bind(bind_address)
    .context("Failed to bind HTTP server")?
    .run();

    run_until_shutdown(
        server,
        None,
        CancellationToken::new(),
        config.service.shutdown_grace(),
    )
    .await?;

    info!("Producer stopped");
    Ok(())
}
