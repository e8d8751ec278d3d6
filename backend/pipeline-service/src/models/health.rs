use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transaction::{Status, Transaction, TransactionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Unhealthy,
}

/// Per-dependency probe results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStatuses {
    pub broker: Status,
    pub cache: Status,
    pub store: Status,
}

impl DependencyStatuses {
    pub fn all_ok(&self) -> bool {
        self.broker.is_ok() && self.cache.is_ok() && self.store.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_status: OverallStatus,
    pub services: DependencyStatuses,
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    pub fn from_statuses(services: DependencyStatuses, timestamp: DateTime<Utc>) -> Self {
        let overall_status = if services.all_ok() {
            OverallStatus::Healthy
        } else {
            OverallStatus::Unhealthy
        };

        Self {
            overall_status,
            services,
            timestamp,
        }
    }
}

/// Combined monitor view; sections whose query failed are left empty
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub health: SystemHealth,
    pub recent_transactions: Vec<Transaction>,
    pub stats: TransactionStats,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_requires_every_dependency() {
        let all_ok = DependencyStatuses {
            broker: Status::Ok,
            cache: Status::Ok,
            store: Status::Ok,
        };
        assert_eq!(
            SystemHealth::from_statuses(all_ok, Utc::now()).overall_status,
            OverallStatus::Healthy
        );

        let cache_down = DependencyStatuses {
            cache: Status::Bad,
            ..all_ok
        };
        assert_eq!(
            SystemHealth::from_statuses(cache_down, Utc::now()).overall_status,
            OverallStatus::Unhealthy
        );
    }

    #[test]
    fn test_health_wire_format() {
        let health = SystemHealth::from_statuses(
            DependencyStatuses {
                broker: Status::Ok,
                cache: Status::Bad,
                store: Status::Ok,
            },
            Utc::now(),
        );
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["overall_status"], "unhealthy");
        assert_eq!(value["services"]["cache"], "bad");
        assert_eq!(value["services"]["broker"], "ok");
    }
}
