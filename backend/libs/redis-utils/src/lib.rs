use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Default deadline for a single Redis command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Lower bound applied to configured command timeouts.
const MIN_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

/// Redis connection pool backed by a reconnecting `ConnectionManager`.
pub struct RedisPool {
    manager: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisPool {
    /// Connect to `redis_url`; the first connection is established eagerly so
    /// an unreachable Redis fails startup.
    pub async fn connect(redis_url: &str, command_timeout: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager initialized");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
            command_timeout: clamp_command_timeout(command_timeout),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

fn clamp_command_timeout(timeout: Duration) -> Duration {
    timeout.max(MIN_COMMAND_TIMEOUT)
}

/// Run a Redis future with a deadline, mapping expiry to an `IoError`.
pub async fn with_timeout<F, T>(timeout: Duration, future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(res) => res,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))),
    }
}
