//! Metrics sink injected into producer, consumer and monitor.
//!
//! Components receive an `Arc<dyn PipelineMetrics>`; the binaries wire in
//! [`PrometheusMetrics`] backed by their own registry.

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, HttpResponse};
use futures::future::{ready, LocalBoxFuture, Ready};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::models::{EventType, ServiceName, Status};

pub trait PipelineMetrics: Send + Sync {
    /// Outcome of a publish or receive on `topic`
    fn broker_message(&self, topic: &str, status: Status);

    /// Time spent on one broker message, recorded even when decoding fails
    fn broker_message_duration(&self, topic: &str, elapsed: Duration);

    fn cache_operation(&self, operation: &str, status: Status);

    fn event_processed(&self, event_type: EventType, service: ServiceName, status: Status);

    fn transaction_recorded(&self, service: ServiceName, broker_status: Status, cache_status: Status);

    fn http_request(&self, method: &str, path: &str, status: u16, elapsed: Duration);
}

/// Discards every observation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {
    fn broker_message(&self, _topic: &str, _status: Status) {}
    fn broker_message_duration(&self, _topic: &str, _elapsed: Duration) {}
    fn cache_operation(&self, _operation: &str, _status: Status) {}
    fn event_processed(&self, _event_type: EventType, _service: ServiceName, _status: Status) {}
    fn transaction_recorded(&self, _service: ServiceName, _broker: Status, _cache: Status) {}
    fn http_request(&self, _method: &str, _path: &str, _status: u16, _elapsed: Duration) {}
}

#[derive(Clone)]
pub struct PrometheusMetrics {
    broker_messages_total: IntCounterVec,
    broker_message_duration_seconds: HistogramVec,
    cache_operations_total: IntCounterVec,
    events_processed_total: IntCounterVec,
    transactions_total: IntCounterVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let broker_messages_total = IntCounterVec::new(
            Opts::new("broker_messages_total", "Broker messages by topic and outcome"),
            &["topic", "status"],
        )?;
        let broker_message_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "broker_message_duration_seconds",
                "Time spent publishing or handling a broker message",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0]),
            &["topic"],
        )?;
        let cache_operations_total = IntCounterVec::new(
            Opts::new("cache_operations_total", "Cache operations by kind and outcome"),
            &["operation", "status"],
        )?;
        let events_processed_total = IntCounterVec::new(
            Opts::new("events_processed_total", "Events handled by pipeline components"),
            &["event_type", "service", "status"],
        )?;
        let transactions_total = IntCounterVec::new(
            Opts::new("transactions_total", "Transaction records produced per service"),
            &["service", "broker_status", "cache_status"],
        )?;
        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "path"],
        )?;

        registry.register(Box::new(broker_messages_total.clone()))?;
        registry.register(Box::new(broker_message_duration_seconds.clone()))?;
        registry.register(Box::new(cache_operations_total.clone()))?;
        registry.register(Box::new(events_processed_total.clone()))?;
        registry.register(Box::new(transactions_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            broker_messages_total,
            broker_message_duration_seconds,
            cache_operations_total,
            events_processed_total,
            transactions_total,
            http_requests_total,
            http_request_duration_seconds,
        })
    }
}

impl PipelineMetrics for PrometheusMetrics {
    fn broker_message(&self, topic: &str, status: Status) {
        self.broker_messages_total
            .with_label_values(&[topic, status.as_str()])
            .inc();
    }

    fn broker_message_duration(&self, topic: &str, elapsed: Duration) {
        self.broker_message_duration_seconds
            .with_label_values(&[topic])
            .observe(elapsed.as_secs_f64());
    }

    fn cache_operation(&self, operation: &str, status: Status) {
        self.cache_operations_total
            .with_label_values(&[operation, status.as_str()])
            .inc();
    }

    fn event_processed(&self, event_type: EventType, service: ServiceName, status: Status) {
        self.events_processed_total
            .with_label_values(&[event_type.as_str(), service.as_str(), status.as_str()])
            .inc();
    }

    fn transaction_recorded(&self, service: ServiceName, broker_status: Status, cache_status: Status) {
        self.transactions_total
            .with_label_values(&[service.as_str(), broker_status.as_str(), cache_status.as_str()])
            .inc();
    }

    fn http_request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let status_label = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_label])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(elapsed.as_secs_f64());
    }
}

/// `GET /metrics` in Prometheus text format
pub async fn serve_metrics(registry: web::Data<Registry>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Records request count and latency for every request through the app
pub struct HttpMetrics {
    metrics: Arc<dyn PipelineMetrics>,
}

impl HttpMetrics {
    pub fn new(metrics: Arc<dyn PipelineMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HttpMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = HttpMetricsService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HttpMetricsService {
            service: Rc::new(service),
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct HttpMetricsService<S> {
    service: Rc<S>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl<S, B> Service<ServiceRequest> for HttpMetricsService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let metrics = self.metrics.clone();
        // Route patterns keep label cardinality bounded (`/api/v1/events/{id}`).
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(_) => 500,
            };
            metrics.http_request(&method, &path, status, start.elapsed());
            result
        })
    }
}
