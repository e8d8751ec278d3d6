pub mod event;
pub mod health;
pub mod transaction;

pub use event::{
    BusinessEventData, Event, EventData, EventPayload, EventSource, EventType, ProcessedEvent,
    ProcessingStatus, SystemMetricData, UserActionData,
};
pub use health::{Dashboard, DependencyStatuses, OverallStatus, SystemHealth};
pub use transaction::{
    monitor_tick_id, NewTransaction, ServiceName, ServiceStats, Status, Transaction,
    TransactionStats,
};

/// Cache key for a raw event published by the producer
pub fn event_key(id: &str) -> String {
    format!("event:{}", id)
}

/// Cache key for the consumer's processed-event wrapper
pub fn processed_event_key(id: &str) -> String {
    format!("processed_event:{}", id)
}
