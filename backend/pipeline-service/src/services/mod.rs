pub mod consumer;
pub mod monitor;
pub mod producer;

use std::time::Duration;

pub use consumer::{EventConsumer, HandleOutcome, ProcessingReport, PROCESSED_EVENT_TTL};
pub use monitor::{HealthMonitor, MonitorProbes, TickReport};
pub use producer::{EventProducer, SendReceipt, RAW_EVENT_TTL};

/// Rolling window for transaction statistics
pub const STATS_WINDOW: Duration = Duration::from_secs(60 * 60);
