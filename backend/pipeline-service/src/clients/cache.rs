use async_trait::async_trait;
use redis::AsyncCommands;
use redis_utils::{with_timeout, RedisPool, SharedConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::HealthProbe;
use crate::error::{CacheError, ProbeError};

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// TTL-based key/value cache for raw and processed events
#[async_trait]
pub trait EventCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// `Ok(None)` when the key is absent or its TTL has elapsed
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn ping(&self) -> CacheResult<()>;
}

/// Redis-backed cache over the shared connection manager
#[derive(Clone)]
pub struct RedisCache {
    manager: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisCache {
    pub fn new(pool: &RedisPool) -> Self {
        Self {
            manager: pool.manager(),
            command_timeout: pool.command_timeout(),
        }
    }
}

#[async_trait]
impl EventCache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        // Redis rejects EX 0.
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.manager.lock().await;
        with_timeout(
            self.command_timeout,
            conn.set_ex::<_, _, ()>(key, value, seconds),
        )
        .await?;

        debug!(key, ttl_secs = seconds, "Cached value");
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.lock().await;
        let value = with_timeout(self.command_timeout, conn.get::<_, Option<String>>(key)).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.manager.lock().await;
        let exists = with_timeout(self.command_timeout, conn.exists::<_, bool>(key)).await?;
        Ok(exists)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.manager.lock().await;
        with_timeout(
            self.command_timeout,
            redis::cmd("PING").query_async::<_, String>(&mut *conn),
        )
        .await?;
        Ok(())
    }
}

/// Cache health via PING on the shared cache client
pub struct CachePingProbe {
    cache: Arc<dyn EventCache>,
}

impl CachePingProbe {
    pub fn new(cache: Arc<dyn EventCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthProbe for CachePingProbe {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn check(&self) -> Result<(), ProbeError> {
        self.cache.ping().await?;
        Ok(())
    }
}
