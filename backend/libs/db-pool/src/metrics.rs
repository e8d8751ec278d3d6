//! Prometheus gauges for database connection pools

use prometheus::{IntGaugeVec, Opts, Registry};
use sqlx::PgPool;

/// Connection counts by state (idle/active/max), labelled by pool name.
#[derive(Clone)]
pub struct PoolMetrics {
    connections: IntGaugeVec,
}

impl PoolMetrics {
    /// Fails if `registry` already holds a `db_pool_connections` family
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let connections = IntGaugeVec::new(
            Opts::new(
                "db_pool_connections",
                "Database pool connection count by state",
            ),
            &["service", "state"],
        )
        .expect("valid metric opts for db_pool_connections");

        registry.register(Box::new(connections.clone()))?;

        Ok(Self { connections })
    }

    pub fn update(&self, pool: &PgPool, service: &str) {
        let size = pool.size() as i64;
        let idle = pool.num_idle() as i64;

        self.connections
            .with_label_values(&[service, "idle"])
            .set(idle);
        self.connections
            .with_label_values(&[service, "active"])
            .set(size - idle);
        self.connections
            .with_label_values(&[service, "max"])
            .set(pool.options().get_max_connections() as i64);
    }
}
