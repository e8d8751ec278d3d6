//! Consumer side of the pipeline.
//!
//! Each message moves through decode, process, cache, record and
//! acknowledge. No step retries: decode, cache and store failures are logged
//! and the message is still committed so the partition keeps moving.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::STATS_WINDOW;
use crate::clients::{BrokerMessage, EventCache, MessageSubscription, TransactionStore};
use crate::error::{CacheError, PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::models::{
    processed_event_key, Event, EventPayload, EventType, NewTransaction, ProcessedEvent,
    ServiceName, Status, TransactionStats,
};

/// Processed wrappers stay readable for thirty minutes
pub const PROCESSED_EVENT_TTL: Duration = Duration::from_secs(30 * 60);

/// Pause after a receive error before polling again
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Statuses produced by [`EventConsumer::process_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingReport {
    /// Always `Ok`: the broker already delivered the message
    pub broker_status: Status,
    pub cache_status: Status,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Payload was not a valid event; nothing was cached or recorded
    DecodeFailed,
    Handled {
        event_id: String,
        report: ProcessingReport,
        /// `None` when the transaction insert failed
        transaction_id: Option<i64>,
    },
}

pub struct EventConsumer {
    cache: Arc<dyn EventCache>,
    store: Arc<dyn TransactionStore>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl EventConsumer {
    pub fn new(
        cache: Arc<dyn EventCache>,
        store: Arc<dyn TransactionStore>,
        metrics: Arc<dyn PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            store,
            metrics,
        }
    }

    /// Handle one delivered message. Never fails; the caller commits the
    /// message whatever the outcome.
    pub async fn handle_message(&self, message: &BrokerMessage) -> HandleOutcome {
        let event: Event = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                self.metrics
                    .broker_message_duration(&message.topic, message.received_at.elapsed());
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to decode event, skipping message"
                );
                return HandleOutcome::DecodeFailed;
            }
        };
        self.metrics.broker_message(&message.topic, Status::Ok);

        let report = self.process_event(&event).await;
        let elapsed = message.received_at.elapsed();

        let tx = NewTransaction::new(
            ServiceName::Consumer,
            event.id(),
            report.broker_status,
            report.cache_status,
            elapsed,
        )
        .with_error(report.error.clone());

        let transaction_id = match self.store.insert_transaction(&tx).await {
            Ok(id) => {
                self.metrics.transaction_recorded(
                    ServiceName::Consumer,
                    report.broker_status,
                    report.cache_status,
                );
                Some(id)
            }
            Err(e) => {
                error!(event_id = %event.id(), error = %e, "Failed to record transaction");
                None
            }
        };

        let status = Status::from_success(report.error.is_none());
        self.metrics
            .event_processed(event.event_type, ServiceName::Consumer, status);
        self.metrics
            .broker_message_duration(&message.topic, message.received_at.elapsed());

        info!(
            event_id = %event.id(),
            event_type = %event.event_type,
            partition = message.partition,
            offset = message.offset,
            broker_status = %report.broker_status,
            cache_status = %report.cache_status,
            duration_ms = tx.duration_ms,
            "Event processed"
        );

        HandleOutcome::Handled {
            event_id: event.id().to_string(),
            report,
            transaction_id,
        }
    }

    /// Cache the processed wrapper and run the per-type handler.
    ///
    /// A cache failure does not abort processing, but it is not a success
    /// either: the report carries `cache_status` bad and an error that ends
    /// up in the transaction's `error_msg`, and the event is counted with
    /// status bad in the processed-events metric.
    pub async fn process_event(&self, event: &Event) -> ProcessingReport {
        let key = processed_event_key(event.id());
        let cached = match serde_json::to_string(&ProcessedEvent::new(event.clone())) {
            Ok(value) => self.cache.set(&key, &value, PROCESSED_EVENT_TTL).await,
            Err(e) => Err(CacheError::Serialization(e)),
        };

        let (cache_status, error) = match cached {
            Ok(()) => (Status::Ok, None),
            Err(e) => {
                error!(event_id = %event.id(), key = %key, error = %e, "Failed to cache processed event");
                (
                    Status::Bad,
                    Some(format!("failed to cache processed event: {}", e)),
                )
            }
        };
        self.metrics.cache_operation("set", cache_status);

        log_event_shape(event);

        ProcessingReport {
            broker_status: Status::Ok,
            cache_status,
            error,
        }
    }

    /// Consume until `cancel` fires, then leave the consumer group.
    ///
    /// A message whose handling is interrupted by cancellation is not
    /// committed and will be redelivered to another group member.
    pub async fn run<S>(&self, mut subscription: S, cancel: CancellationToken)
    where
        S: MessageSubscription,
    {
        info!("Consumer loop started");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                received = subscription.recv() => received,
            };

            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    error!(error = %e, "Kafka receive error");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => continue,
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        "Shutdown during message handling, leaving it uncommitted"
                    );
                    break;
                }
                _ = self.handle_message(&message) => {}
            }

            if let Err(e) = subscription.commit(&message).await {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to commit Kafka offset"
                );
            }
        }

        if let Err(e) = subscription.leave().await {
            warn!(error = %e, "Failed to leave consumer group cleanly");
        }
        info!("Consumer loop stopped");
    }

    pub async fn get_processed_event(&self, id: &str) -> PipelineResult<ProcessedEvent> {
        let key = processed_event_key(id);
        let cached = self.cache.get(&key).await;
        self.metrics.cache_operation("get", Status::of(&cached));

        let raw = cached?.ok_or_else(|| {
            PipelineError::NotFound(format!("processed event {} not found", id))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Internal(format!("cached processed event {} is corrupt: {}", id, e))
        })
    }

    /// Per-service aggregates over the last hour
    pub async fn get_stats(&self) -> PipelineResult<TransactionStats> {
        Ok(self.store.aggregate_stats(STATS_WINDOW).await?)
    }
}

/// Structured log of the fields each known event shape carries
fn log_event_shape(event: &Event) {
    match event.payload() {
        EventPayload::UserAction(data) => info!(
            event_id = %event.id(),
            user_id = %event.user_id,
            action = ?data.action,
            "Processing user action"
        ),
        EventPayload::SystemMetric(data) => info!(
            event_id = %event.id(),
            cpu_usage = ?data.cpu_usage,
            memory_usage = ?data.memory_usage,
            "Processing system metric"
        ),
        EventPayload::BusinessEvent(data) => info!(
            event_id = %event.id(),
            order_id = ?data.order_id,
            amount = ?data.amount,
            currency = ?data.currency,
            "Processing business event"
        ),
        EventPayload::Generic(data) => match event.event_type {
            EventType::UserAction | EventType::SystemMetric | EventType::BusinessEvent => warn!(
                event_id = %event.id(),
                event_type = %event.event_type,
                "Event data does not match the expected shape"
            ),
            _ => {
                warn!(event_id = %event.id(), event_type = %event.event_type, "Unknown event type");
                debug!(fields = data.len(), "Unrecognized event data");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::models::{EventData, EventSource};
    use crate::test_support::{message, InMemoryCache, InMemoryStore, RecordingMetrics, ScriptedSubscription};
    use serde_json::json;

    struct Fixture {
        consumer: Arc<EventConsumer>,
        cache: Arc<InMemoryCache>,
        store: Arc<InMemoryStore>,
        metrics: Arc<RecordingMetrics>,
    }

    fn fixture() -> Fixture {
        let cache = InMemoryCache::new();
        let store = InMemoryStore::new();
        let metrics = RecordingMetrics::new();
        let consumer = Arc::new(EventConsumer::new(
            cache.clone(),
            store.clone(),
            metrics.clone(),
        ));
        Fixture {
            consumer,
            cache,
            store,
            metrics,
        }
    }

    fn encoded(id: &str, event_type: EventType) -> Vec<u8> {
        let mut data = EventData::new();
        data.insert("action".into(), json!("click"));
        let event = Event::with_id(id, event_type, "u1", EventSource::Producer, data);
        serde_json::to_vec(&event).unwrap()
    }

    #[tokio::test]
    async fn test_handle_message_caches_and_records() {
        let f = fixture();
        let outcome = f
            .consumer
            .handle_message(&message(0, &encoded("e1", EventType::UserAction)))
            .await;

        match outcome {
            HandleOutcome::Handled { event_id, report, transaction_id } => {
                assert_eq!(event_id, "e1");
                assert_eq!(report.broker_status, Status::Ok);
                assert_eq!(report.cache_status, Status::Ok);
                assert_eq!(report.error, None);
                assert_eq!(transaction_id, Some(1));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let rows = f.store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].service, ServiceName::Consumer);
        assert_eq!(rows[0].event_id, "e1");
        assert!(rows[0].duration_ms >= 0);

        let processed = f.consumer.get_processed_event("e1").await.unwrap();
        assert_eq!(processed.event.id(), "e1");
        let raw: serde_json::Value =
            serde_json::from_str(&f.cache.raw("processed_event:e1").unwrap()).unwrap();
        assert_eq!(raw["status"], "processed");
    }

    #[tokio::test]
    async fn test_cache_failure_marks_status_bad_but_records() {
        let f = fixture();
        f.cache.set_failing(true);

        let outcome = f
            .consumer
            .handle_message(&message(0, &encoded("e1", EventType::SystemMetric)))
            .await;

        let HandleOutcome::Handled { report, .. } = outcome else {
            panic!("message should have been handled");
        };
        assert_eq!(report.broker_status, Status::Ok);
        assert_eq!(report.cache_status, Status::Bad);

        let rows = f.store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cache_status, Status::Bad);
        assert!(rows[0]
            .error_msg
            .as_deref()
            .is_some_and(|msg| msg.starts_with("failed to cache processed event")));

        assert_eq!(
            *f.metrics.cache.lock().unwrap(),
            vec![("set".to_string(), Status::Bad)]
        );
        assert_eq!(
            *f.metrics.events.lock().unwrap(),
            vec![(EventType::SystemMetric, ServiceName::Consumer, Status::Bad)]
        );
    }

    #[tokio::test]
    async fn test_decode_failure_records_nothing() {
        let f = fixture();
        let outcome = f.consumer.handle_message(&message(0, b"{not json")).await;

        assert_eq!(outcome, HandleOutcome::DecodeFailed);
        assert!(f.store.rows().is_empty());
        assert!(f.metrics.events.lock().unwrap().is_empty());
        assert_eq!(f.metrics.durations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let f = fixture();
        f.store.set_failing(true);

        let outcome = f
            .consumer
            .handle_message(&message(0, &encoded("e1", EventType::BusinessEvent)))
            .await;

        let HandleOutcome::Handled { transaction_id, .. } = outcome else {
            panic!("message should have been handled");
        };
        assert_eq!(transaction_id, None);
        assert!(f.metrics.transactions.lock().unwrap().is_empty());
        // Processing itself still happened.
        assert!(f.cache.raw("processed_event:e1").is_some());
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_still_processed() {
        let f = fixture();
        let payload = br#"{"id":"e9","type":"page_view","user_id":"u1","data":{}}"#;

        let outcome = f.consumer.handle_message(&message(0, payload)).await;
        assert!(matches!(outcome, HandleOutcome::Handled { .. }));
        assert_eq!(
            f.metrics.events.lock().unwrap().as_slice(),
            &[(EventType::Other, ServiceName::Consumer, Status::Ok)]
        );
    }

    #[tokio::test]
    async fn test_stats_after_many_messages() {
        let f = fixture();
        for i in 0..25 {
            let id = format!("e{}", i);
            f.consumer
                .handle_message(&message(i, &encoded(&id, EventType::UserAction)))
                .await;
        }

        let stats = f.consumer.get_stats().await.unwrap();
        let consumer = &stats["consumer"];
        assert_eq!(consumer.total_transactions, 25);
        assert_eq!(consumer.broker_ok, 25);
        assert_eq!(consumer.broker_bad, 0);
        assert_eq!(consumer.cache_ok, 25);
    }

    #[tokio::test]
    async fn test_get_processed_event_missing() {
        let f = fixture();
        assert!(matches!(
            f.consumer.get_processed_event("nope").await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run_commits_every_message_and_leaves_on_cancel() {
        let f = fixture();
        let (subscription, log) = ScriptedSubscription::new(vec![
            Ok(message(10, &encoded("e1", EventType::UserAction))),
            Ok(message(11, b"garbage")),
            Ok(message(12, &encoded("e2", EventType::Error))),
        ]);
        f.cache.set_failing(true);

        let cancel = CancellationToken::new();
        let consumer = f.consumer.clone();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { consumer.run(subscription, cancel).await }
        });

        for _ in 0..100 {
            if log.committed().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(log.committed(), vec![10, 11, 12]);

        cancel.cancel();
        task.await.unwrap();
        assert!(log.has_left());
        // Decode failure is committed but not recorded.
        assert_eq!(f.store.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_run_cancelled_mid_message_leaves_it_uncommitted() {
        let f = fixture();
        f.cache.set_stalled(true);
        let (subscription, log) = ScriptedSubscription::new(vec![Ok(message(
            7,
            &encoded("e1", EventType::UserAction),
        ))]);

        let cancel = CancellationToken::new();
        let consumer = f.consumer.clone();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { consumer.run(subscription, cancel).await }
        });

        f.cache.stall_reached().await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop while the message is in flight")
            .unwrap();

        assert!(log.committed().is_empty());
        assert!(log.has_left());
        assert!(f.store.rows().is_empty());
        assert!(f.cache.raw("processed_event:e1").is_none());
    }

    #[tokio::test]
    async fn test_null_data_is_processed_as_empty() {
        let f = fixture();
        let payload = br#"{"id":"e5","type":"user_action","user_id":"u1","data":null}"#;

        let outcome = f.consumer.handle_message(&message(0, payload)).await;
        assert!(matches!(outcome, HandleOutcome::Handled { .. }));
        assert_eq!(f.store.rows().len(), 1);

        let processed = f.consumer.get_processed_event("e5").await.unwrap();
        assert!(processed.event.data.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_backs_off_after_receive_error() {
        let f = fixture();
        let (subscription, log) = ScriptedSubscription::new(vec![
            Err(BrokerError::Unavailable("rebalance".into())),
            Ok(message(3, &encoded("e1", EventType::UserAction))),
        ]);

        let cancel = CancellationToken::new();
        let consumer = f.consumer.clone();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { consumer.run(subscription, cancel).await }
        });

        tokio::time::sleep(RECV_ERROR_BACKOFF / 2).await;
        assert!(log.committed().is_empty());

        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
        assert_eq!(log.committed(), vec![3]);

        cancel.cancel();
        task.await.unwrap();
        assert!(log.has_left());
    }
}
