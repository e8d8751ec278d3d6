use actix_web::{web, HttpResponse};

use crate::error::PipelineError;
use crate::services::EventConsumer;

/// GET /api/v1/events/{id}
pub async fn get_processed_event(
    consumer: web::Data<EventConsumer>,
    path: web::Path<String>,
) -> Result<HttpResponse, PipelineError> {
    let processed = consumer.get_processed_event(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(processed))
}

/// GET /api/v1/stats
pub async fn get_stats(consumer: web::Data<EventConsumer>) -> Result<HttpResponse, PipelineError> {
    let stats = consumer.get_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/events/{id}", web::get().to(get_processed_event))
            .route("/stats", web::get().to(get_stats)),
    );
}
