use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::STATS_WINDOW;
use crate::clients::{HealthProbe, TransactionStore};
use crate::error::{PipelineResult, ProbeError};
use crate::metrics::PipelineMetrics;
use crate::models::{
    monitor_tick_id, Dashboard, DependencyStatuses, NewTransaction, ServiceName, Status,
    SystemHealth, Transaction, TransactionStats,
};

/// Rows included in the dashboard view
pub const DASHBOARD_RECENT_LIMIT: i64 = 10;

/// Probes for the three backing dependencies.
///
/// Broker and store probes hold their own clients so health checks never
/// share connections with the data plane.
#[derive(Clone)]
pub struct MonitorProbes {
    pub broker: Arc<dyn HealthProbe>,
    pub cache: Arc<dyn HealthProbe>,
    pub store: Arc<dyn HealthProbe>,
}

/// Result of one periodic probe-and-record cycle
#[derive(Debug, Clone)]
pub struct TickReport {
    pub event_id: String,
    pub statuses: DependencyStatuses,
    /// `None` when the transaction insert failed
    pub transaction_id: Option<i64>,
}

pub struct HealthMonitor {
    probes: MonitorProbes,
    store: Arc<dyn TransactionStore>,
    metrics: Arc<dyn PipelineMetrics>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        probes: MonitorProbes,
        store: Arc<dyn TransactionStore>,
        metrics: Arc<dyn PipelineMetrics>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            probes,
            store,
            metrics,
            interval,
            probe_timeout,
        }
    }

    /// Run one health check under the configured timeout
    async fn check(&self, probe: &dyn HealthProbe) -> Result<(), ProbeError> {
        match timeout(self.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.probe_timeout)),
        }
    }

    /// Any failure, including a timeout, reads as `Bad`
    async fn probe(&self, probe: &dyn HealthProbe) -> Status {
        let result = self.check(probe).await;
        if let Err(e) = &result {
            warn!(dependency = probe.name(), error = %e, "Health probe failed");
        }
        Status::of(&result)
    }

    /// Probe all dependencies concurrently
    async fn probe_all(&self) -> DependencyStatuses {
        let (broker, cache, store) = tokio::join!(
            self.probe(self.probes.broker.as_ref()),
            self.probe(self.probes.cache.as_ref()),
            self.probe(self.probes.store.as_ref()),
        );

        DependencyStatuses {
            broker,
            cache,
            store,
        }
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        let statuses = self.probe_all().await;
        SystemHealth::from_statuses(statuses, Utc::now())
    }

    /// Probe once and record the synthetic monitor transaction.
    ///
    /// Store status is reported by health queries only; the transaction row
    /// carries broker and cache statuses.
    pub async fn record_tick(&self) -> TickReport {
        let start = Instant::now();
        let statuses = self.probe_all().await;
        let event_id = monitor_tick_id(Utc::now());

        let tx = NewTransaction::new(
            ServiceName::Monitor,
            event_id.clone(),
            statuses.broker,
            statuses.cache,
            start.elapsed(),
        );

        let transaction_id = match self.store.insert_transaction(&tx).await {
            Ok(id) => {
                self.metrics
                    .transaction_recorded(ServiceName::Monitor, statuses.broker, statuses.cache);
                Some(id)
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to save monitor transaction");
                None
            }
        };

        info!(
            event_id = %event_id,
            broker_status = %statuses.broker,
            cache_status = %statuses.cache,
            store_status = %statuses.store,
            duration_ms = tx.duration_ms,
            "Health check completed"
        );

        TickReport {
            event_id,
            statuses,
            transaction_id,
        }
    }

    /// Tick every `interval` until cancelled. The first tick fires one full
    /// interval after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Health monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.record_tick() => {}
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// Most recent transactions first
    pub async fn get_transactions(&self, limit: i64) -> PipelineResult<Vec<Transaction>> {
        Ok(self.store.list_recent(limit).await?)
    }

    /// Per-service aggregates over the last hour
    pub async fn get_transaction_stats(&self) -> PipelineResult<TransactionStats> {
        Ok(self.store.aggregate_stats(STATS_WINDOW).await?)
    }

    /// Health, recent transactions and stats in one view. Query failures
    /// leave their section empty rather than failing the whole view.
    pub async fn get_dashboard(&self) -> Dashboard {
        let (health, recent, stats) = tokio::join!(
            self.get_system_health(),
            self.get_transactions(DASHBOARD_RECENT_LIMIT),
            self.get_transaction_stats(),
        );

        let recent_transactions = recent.unwrap_or_else(|e| {
            warn!(error = %e, "Dashboard: failed to load recent transactions");
            Vec::new()
        });
        let stats = stats.unwrap_or_else(|e| {
            warn!(error = %e, "Dashboard: failed to load transaction stats");
            TransactionStats::new()
        });

        Dashboard {
            health,
            recent_transactions,
            stats,
            timestamp: Utc::now(),
        }
    }
}
