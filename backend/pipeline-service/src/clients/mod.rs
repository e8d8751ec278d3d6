//! Dependency capabilities used by the pipeline and their concrete adapters
//!
//! The producer, consumer and monitor depend only on the traits here; the
//! binaries wire in the Kafka, Redis and PostgreSQL implementations.

pub mod broker;
pub mod cache;
pub mod store;

use async_trait::async_trait;

use crate::error::ProbeError;

pub use broker::{
    BrokerMessage, BrokerResult, EventPublisher, KafkaHealthProbe, KafkaPublisher,
    KafkaSubscription, MessageSubscription, PublishAck,
};
pub use cache::{CachePingProbe, CacheResult, EventCache, RedisCache};
pub use store::{PgHealthProbe, PgTransactionStore, StoreResult, TransactionStore};

/// Liveness check for one backing dependency
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Dependency name used in logs
    fn name(&self) -> &'static str;

    /// Returns `Ok(())` if the dependency is reachable and usable
    async fn check(&self) -> Result<(), ProbeError>;
}
