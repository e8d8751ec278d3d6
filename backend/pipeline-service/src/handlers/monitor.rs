use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::PipelineError;
use crate::services::HealthMonitor;

pub const DEFAULT_TRANSACTION_LIMIT: i64 = 100;
pub const MAX_TRANSACTION_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<String>,
}

/// Values outside `1..=1000` (or unparsable) fall back to the default
pub fn normalize_limit(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|limit| (1..=MAX_TRANSACTION_LIMIT).contains(limit))
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
}

/// GET /api/v1/health
pub async fn get_health(monitor: web::Data<HealthMonitor>) -> HttpResponse {
    HttpResponse::Ok().json(monitor.get_system_health().await)
}

/// GET /api/v1/transactions?limit=N
pub async fn get_transactions(
    monitor: web::Data<HealthMonitor>,
    query: web::Query<TransactionsQuery>,
) -> Result<HttpResponse, PipelineError> {
    let limit = normalize_limit(query.limit.as_deref());
    let transactions = monitor.get_transactions(limit).await?;

    Ok(HttpResponse::Ok().json(json!({
        "count": transactions.len(),
        "limit": limit,
        "transactions": transactions,
    })))
}

/// GET /api/v1/stats
pub async fn get_stats(monitor: web::Data<HealthMonitor>) -> Result<HttpResponse, PipelineError> {
    let stats = monitor.get_transaction_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// GET /api/v1/dashboard
pub async fn get_dashboard(monitor: web::Data<HealthMonitor>) -> HttpResponse {
    HttpResponse::Ok().json(monitor.get_dashboard().await)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(get_health))
            .route("/transactions", web::get().to(get_transactions))
            .route("/stats", web::get().to(get_stats))
            .route("/dashboard", web::get().to(get_dashboard)),
    );
}
