use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::HealthProbe;
use crate::config::KafkaConfig;
use crate::error::{BrokerError, ProbeError};

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Broker acknowledgement for a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub partition: i32,
    pub offset: i64,
}

/// A message received from a subscription, detached from the client buffer
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<PublishAck>;
}

/// Consumer-group subscription with manual acknowledgement
#[async_trait]
pub trait MessageSubscription: Send {
    /// Wait for the next message on any claimed partition
    async fn recv(&mut self) -> BrokerResult<BrokerMessage>;

    /// Mark `message` consumed for the group
    async fn commit(&mut self, message: &BrokerMessage) -> BrokerResult<()>;

    /// Leave the consumer group; uncommitted messages are redelivered to
    /// remaining members
    async fn leave(&mut self) -> BrokerResult<()>;
}

/// Kafka producer wrapper
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> BrokerResult<Self> {
        let timeout = config.publish_timeout();
        let producer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .set("retries", "5")
            .create()?;

        info!(brokers = %config.brokers, "Kafka producer created");

        Ok(Self { producer, timeout })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<PublishAck> {
        let record = FutureRecord::to(topic).payload(payload).key(key);

        debug!(topic, key, "Publishing message");

        match timeout(self.timeout, self.producer.send(record, self.timeout)).await {
            Ok(Ok((partition, offset))) => Ok(PublishAck { partition, offset }),
            Ok(Err((e, _))) => Err(BrokerError::Kafka(e)),
            Err(_) => {
                warn!(topic, key, "Kafka send timed out after {:?}", self.timeout);
                Err(BrokerError::Timeout(self.timeout))
            }
        }
    }
}

/// Kafka consumer-group member with auto-commit disabled
pub struct KafkaSubscription {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSubscription {
    pub fn subscribe(config: &KafkaConfig) -> BrokerResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "latest")
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", "45000")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl MessageSubscription for KafkaSubscription {
    async fn recv(&mut self) -> BrokerResult<BrokerMessage> {
        let record = self.consumer.recv().await?;

        Ok(BrokerMessage {
            topic: record.topic().to_string(),
            partition: record.partition(),
            offset: record.offset(),
            key: record
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: record.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            received_at: Instant::now(),
        })
    }

    async fn commit(&mut self, message: &BrokerMessage) -> BrokerResult<()> {
        // Committed offset is the next one to read.
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }

    async fn leave(&mut self) -> BrokerResult<()> {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer left group");
        Ok(())
    }
}

/// Broker health check on its own metadata client, separate from the data plane
pub struct KafkaHealthProbe {
    client: Arc<BaseConsumer>,
    timeout: Duration,
}

impl KafkaHealthProbe {
    /// Build the metadata client once; it is reused by every check
    pub fn new(brokers: &str, timeout: Duration) -> BrokerResult<Self> {
        let client: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("socket.timeout.ms", timeout.as_millis().to_string())
            .create()?;

        Ok(Self {
            client: Arc::new(client),
            timeout,
        })
    }

    /// Fetch cluster metadata and return advertised broker addresses
    async fn broker_addresses(&self) -> BrokerResult<Vec<String>> {
        let client = self.client.clone();
        let fetch_timeout = self.timeout;

        // librdkafka metadata fetch is blocking; it gives up after `fetch_timeout`.
        tokio::task::spawn_blocking(move || -> BrokerResult<Vec<String>> {
            let metadata = client.fetch_metadata(None, fetch_timeout)?;

            if metadata.topics().is_empty() {
                warn!("Kafka cluster reports no topics");
            }

            Ok(metadata
                .brokers()
                .iter()
                .map(|b| format!("{}:{}", b.host(), b.port()))
                .collect())
        })
        .await
        .map_err(|e| BrokerError::Unavailable(format!("metadata task failed: {}", e)))?
    }
}

#[async_trait]
impl HealthProbe for KafkaHealthProbe {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let addresses = self.broker_addresses().await?;
        if addresses.is_empty() {
            return Err(BrokerError::NoBrokers.into());
        }

        for address in addresses {
            match timeout(self.timeout, TcpStream::connect(&address)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    return Err(BrokerError::Unreachable {
                        broker: address,
                        reason: e.to_string(),
                    }
                    .into())
                }
                Err(_) => {
                    return Err(BrokerError::Unreachable {
                        broker: address,
                        reason: "connect timed out".to_string(),
                    }
                    .into())
                }
            }
        }

        Ok(())
    }
}
