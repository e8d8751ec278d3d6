use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failures talking to the message broker
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("no brokers available in cluster metadata")]
    NoBrokers,

    #[error("broker {broker} unreachable: {reason}")]
    Unreachable { broker: String, reason: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Failures talking to the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to serialize cached value: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Failures talking to the durable store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid row value: {0}")]
    InvalidRow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single dependency health probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Service-level error surfaced by producer, consumer and monitor operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for PipelineError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            PipelineError::NotFound(msg) | PipelineError::Validation(msg) => msg.clone(),
            _ => self.to_string(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
