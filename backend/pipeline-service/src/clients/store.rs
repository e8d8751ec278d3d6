use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::HealthProbe;
use crate::error::{ProbeError, StoreError};
use crate::models::{NewTransaction, ServiceStats, Transaction, TransactionStats};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Append-only transaction log with the two query shapes the monitor needs
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert one row and return the store-assigned id
    async fn insert_transaction(&self, tx: &NewTransaction) -> StoreResult<i64>;

    /// Most recent rows first, at most `limit`
    async fn list_recent(&self, limit: i64) -> StoreResult<Vec<Transaction>>;

    /// Per-service counts and average duration over the trailing `window`
    async fn aggregate_stats(&self, window: Duration) -> StoreResult<TransactionStats>;
}

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the transactions table and indexes if missing
    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("Transaction store migrations applied");
        Ok(())
    }
}

fn transaction_from_row(row: &PgRow) -> StoreResult<Transaction> {
    let broker_status: String = row.try_get("broker_status")?;
    let cache_status: String = row.try_get("cache_status")?;
    let service: String = row.try_get("service")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        broker_status: broker_status.parse().map_err(StoreError::InvalidRow)?,
        cache_status: cache_status.parse().map_err(StoreError::InvalidRow)?,
        duration_ms: row.try_get("duration_ms")?,
        service: service.parse().map_err(StoreError::InvalidRow)?,
        event_id: row.try_get("event_id")?,
        error_msg: row.try_get("error_msg")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert_transaction(&self, tx: &NewTransaction) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO transactions
                (timestamp, broker_status, cache_status, duration_ms, service, event_id, error_msg)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(tx.timestamp)
        .bind(tx.broker_status.as_str())
        .bind(tx.cache_status.as_str())
        .bind(tx.duration_ms)
        .bind(tx.service.as_str())
        .bind(&tx.event_id)
        .bind(tx.error_msg.as_deref())
        .fetch_one(&self.pool)
        .await?;

        debug!(id, event_id = %tx.event_id, service = %tx.service, "Transaction recorded");
        Ok(id)
    }

    async fn list_recent(&self, limit: i64) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, broker_status, cache_status, duration_ms,
                   service, event_id, error_msg, created_at, updated_at
            FROM transactions
            ORDER BY timestamp DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn aggregate_stats(&self, window: Duration) -> StoreResult<TransactionStats> {
        let rows = sqlx::query(
            r#"
            SELECT service,
                   COUNT(*) AS total_transactions,
                   COUNT(*) FILTER (WHERE broker_status = 'ok') AS broker_ok,
                   COUNT(*) FILTER (WHERE broker_status = 'bad') AS broker_bad,
                   COUNT(*) FILTER (WHERE cache_status = 'ok') AS cache_ok,
                   COUNT(*) FILTER (WHERE cache_status = 'bad') AS cache_bad,
                   COALESCE(AVG(duration_ms), 0)::FLOAT8 AS avg_duration_ms
            FROM transactions
            WHERE timestamp > NOW() - make_interval(secs => $1)
            GROUP BY service
            "#,
        )
        .bind(window.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = TransactionStats::new();
        for row in rows {
            let service: String = row.try_get("service")?;
            stats.insert(
                service,
                ServiceStats {
                    total_transactions: row.try_get("total_transactions")?,
                    broker_ok: row.try_get("broker_ok")?,
                    broker_bad: row.try_get("broker_bad")?,
                    cache_ok: row.try_get("cache_ok")?,
                    cache_bad: row.try_get("cache_bad")?,
                    avg_duration_ms: row.try_get("avg_duration_ms")?,
                },
            );
        }

        Ok(stats)
    }
}

/// Store health on a dedicated pool, separate from the data-plane pool
pub struct PgHealthProbe {
    pool: PgPool,
}

impl PgHealthProbe {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for PgHealthProbe {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn check(&self) -> Result<(), ProbeError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let in_recovery: bool = sqlx::query_scalar("SELECT pg_is_in_recovery()")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if in_recovery {
            warn!("PostgreSQL is in recovery (read-only)");
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        debug!(transactions = count, "Store health probe passed");

        Ok(())
    }
}
