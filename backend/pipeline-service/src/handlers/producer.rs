use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use super::ServiceInfo;
use crate::error::PipelineError;
use crate::models::Event;
use crate::services::EventProducer;

/// Publish an event; an id is generated when the body has none
///
/// POST /api/v1/events
pub async fn send_event(
    producer: web::Data<EventProducer>,
    body: web::Json<Event>,
) -> Result<HttpResponse, PipelineError> {
    let mut event = body.into_inner();
    event.assign_id_if_missing();

    let receipt = producer.send_event(&event).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Event sent successfully",
        "event_id": receipt.event_id,
        "cache_status": receipt.cache_status,
        "duration_ms": receipt.duration.as_millis() as u64,
    })))
}

/// GET /api/v1/events/{id}
pub async fn get_event(
    producer: web::Data<EventProducer>,
    path: web::Path<String>,
) -> Result<HttpResponse, PipelineError> {
    let event = producer.get_event(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(event))
}

/// GET /api/v1/stats
pub async fn get_stats(info: web::Data<ServiceInfo>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": info.name,
        "status": "healthy",
        "started_at": info.started_at,
        "uptime_secs": info.uptime_secs(),
        "timestamp": Utc::now(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/events", web::post().to(send_event))
            .route("/events/{id}", web::get().to(get_event))
            .route("/stats", web::get().to(get_stats)),
    );
}
