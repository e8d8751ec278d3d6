//! Database connection pool management
//!
//! Provides unified PostgreSQL pool creation and configuration for the
//! pipeline binaries (transaction store and health-check pools).

mod env_utils;
mod metrics;

pub use env_utils::{parse_env_required, parse_env_with_default};
pub use metrics::PoolMetrics;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Upper bound for any single pool, regardless of env overrides
pub const MAX_POOL_CONNECTIONS: u32 = 100;

/// Database connection pool configuration
#[derive(Clone)]
pub struct DbConfig {
    /// Pool name for metrics labeling
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection verification timeout
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    /// Connection idle timeout
    pub idle_timeout_secs: u64,
    /// Connection maximum lifetime
    pub max_lifetime_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 25,
            min_connections: 5,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 300,
        }
    }
}

impl DbConfig {
    /// Create a new DbConfig from environment variables.
    ///
    /// `DATABASE_URL` is required; every other knob falls back to the
    /// per-pool defaults from [`DbConfig::for_service`].
    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let database_url: String = parse_env_required("DATABASE_URL")?;
        let mut config = Self::for_service(service_name);
        config.database_url = database_url;
        Ok(config)
    }

    /// Pool sizing per pipeline role.
    ///
    /// The consumer pool carries one insert per message; the health-check
    /// pool is kept small and separate from the data-plane pool.
    pub fn for_service(service_name: &str) -> Self {
        let (max, min) = match service_name {
            "consumer" => (25, 5),
            "monitor" => (10, 2),
            "monitor-health" => (10, 1),
            _ => (2, 1),
        };

        let defaults = Self::default();
        let max_connections =
            parse_env_with_default("DB_MAX_CONNECTIONS", max).min(MAX_POOL_CONNECTIONS);
        let min_connections =
            parse_env_with_default("DB_MIN_CONNECTIONS", min).min(max_connections);

        Self {
            service_name: service_name.to_string(),
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            max_connections,
            min_connections,
            connect_timeout_secs: parse_env_with_default(
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            acquire_timeout_secs: parse_env_with_default(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            idle_timeout_secs: parse_env_with_default(
                "DB_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout_secs,
            ),
            max_lifetime_secs: parse_env_with_default(
                "DB_MAX_LIFETIME_SECS",
                defaults.max_lifetime_secs,
            ),
        }
    }

    /// Derive the dedicated health-check pool config from a data-plane config.
    pub fn for_health_checks(&self) -> Self {
        Self {
            service_name: format!("{}-health", self.service_name),
            max_connections: 10,
            min_connections: 1,
            ..self.clone()
        }
    }

    /// Log pool configuration details
    pub fn log_config(&self) {
        info!(
            pool = %self.service_name,
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            connect_timeout_secs = self.connect_timeout_secs,
            acquire_timeout_secs = self.acquire_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_lifetime_secs = self.max_lifetime_secs,
            "Database pool configuration"
        );
    }
}

/// Create a PostgreSQL connection pool and verify it with `SELECT 1`.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, sqlx::Error> {
    debug!(
        "Creating database pool: service={}, max={}, min={}, acquire_timeout={}s",
        config.service_name,
        config.max_connections,
        config.min_connections,
        config.acquire_timeout_secs,
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    match tokio::time::timeout(
        Duration::from_secs(config.connect_timeout_secs),
        sqlx::query("SELECT 1").execute(&pool),
    )
    .await
    {
        Ok(Ok(_)) => {
            info!(
                service = %config.service_name,
                "Database pool created and verified successfully"
            );
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(
                service = %config.service_name,
                error = %e,
                "Database connection verification failed"
            );
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "Database connection verification timeout"
            );
            Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Database verification timeout",
            )))
        }
    }
}

/// Interval between gauge refreshes
pub const METRICS_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Create a pool and keep its connection gauges fresh.
///
/// The gauge updater stops when `cancel` fires or the pool is closed.
pub async fn create_pool_with_metrics(
    config: DbConfig,
    metrics: PoolMetrics,
    cancel: CancellationToken,
) -> Result<PgPool, sqlx::Error> {
    let service = config.service_name.clone();
    let pool = create_pool(config).await?;

    spawn_metrics_updater(pool.clone(), metrics, service, cancel);

    Ok(pool)
}

/// Refresh `metrics` from `pool` until cancelled or the pool closes
pub fn spawn_metrics_updater(
    pool: PgPool,
    metrics: PoolMetrics,
    service: String,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    metrics.update(&pool, &service);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_UPDATE_INTERVAL);
        interval.tick().await;

        while !pool.is_closed() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => metrics.update(&pool, &service),
            }
        }
        debug!(service = %service, "Pool metrics updater stopped");
    })
}
