//! Event pipeline: a producer that publishes events to Kafka and caches them
//! in Redis, a consumer that processes them and records transactions in
//! PostgreSQL, and a monitor that probes all three dependencies on a fixed
//! interval and serves health, transaction and dashboard views.

pub mod clients;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod runtime;
pub mod services;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{PipelineError, PipelineResult};
pub use metrics::{NoopMetrics, PipelineMetrics, PrometheusMetrics};
