//! Audit records for pipeline operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Outcome of one dependency hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Bad,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Bad => "bad",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Status::Ok
        } else {
            Status::Bad
        }
    }

    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        Self::from_success(result.is_ok())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Status::Ok),
            "bad" => Ok(Status::Bad),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Component that performed an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    Producer,
    Consumer,
    Monitor,
    Gateway,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Producer => "producer",
            ServiceName::Consumer => "consumer",
            ServiceName::Monitor => "monitor",
            ServiceName::Gateway => "gateway",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "producer" => Ok(ServiceName::Producer),
            "consumer" => Ok(ServiceName::Consumer),
            "monitor" => Ok(ServiceName::Monitor),
            "gateway" | "api-gateway" => Ok(ServiceName::Gateway),
            other => Err(format!("unknown service '{}'", other)),
        }
    }
}

/// A transaction about to be inserted; the store assigns id and bookkeeping
/// timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub timestamp: DateTime<Utc>,
    pub broker_status: Status,
    pub cache_status: Status,
    pub duration_ms: i64,
    pub service: ServiceName,
    pub event_id: String,
    pub error_msg: Option<String>,
}

impl NewTransaction {
    pub fn new(
        service: ServiceName,
        event_id: impl Into<String>,
        broker_status: Status,
        cache_status: Status,
        elapsed: Duration,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            broker_status,
            cache_status,
            duration_ms: duration_millis(elapsed),
            service,
            event_id: event_id.into(),
            error_msg: None,
        }
    }

    pub fn with_error(mut self, error_msg: Option<String>) -> Self {
        self.error_msg = error_msg;
        self
    }
}

/// Event identifier used by the monitor's synthetic per-tick transaction
pub fn monitor_tick_id(at: DateTime<Utc>) -> String {
    format!("monitor-{}", at.format("%Y%m%d%H%M%S"))
}

/// Milliseconds, saturating at `i64::MAX`
pub fn duration_millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}

/// A persisted transaction row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub broker_status: Status,
    pub cache_status: Status,
    pub duration_ms: i64,
    pub service: ServiceName,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Windowed aggregate for a single service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total_transactions: i64,
    pub broker_ok: i64,
    pub broker_bad: i64,
    pub cache_ok: i64,
    pub cache_bad: i64,
    pub avg_duration_ms: f64,
}

/// Aggregates keyed by service label
pub type TransactionStats = BTreeMap<String, ServiceStats>;
