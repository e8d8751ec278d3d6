//! HTTP adapters for the three binaries
//!
//! Every binary exposes `GET /health` (liveness) and `GET /metrics`; the
//! service-specific routes live under `/api/v1`.

pub mod consumer;
pub mod monitor;
pub mod producer;

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Instant;

use crate::error::PipelineError;
use crate::metrics::serve_metrics;

/// Identity and start time of the running binary
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Liveness only; dependency health is served by the monitor
///
/// GET /health
pub async fn health(info: web::Data<ServiceInfo>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": info.name,
        "timestamp": Utc::now(),
    }))
}

/// Routes shared by every binary
pub fn configure_common(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics));
}

/// Malformed request bodies answer with the JSON error shape
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        PipelineError::Validation(format!("Invalid JSON: {}", err)).into()
    })
}
