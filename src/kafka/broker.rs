use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_config::KafkaConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use super::config::create_client_config;
use super::context::RebalanceForwarder;
use crate::broker::{
    BrokerError, BrokerTransaction, Headers, InboundRecord, LogBroker, OutboundRecord,
    RebalanceListener, RecordMetadata, Subscription,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Kafka-backed partitioned log
///
/// Producer settings:
/// - `acks=all`, `enable.idempotence=true`: no loss, no duplicate writes
///   within a producer session
/// - partitioner `murmur2_random`: same key to partition mapping as the
///   Java client, so `order_id` ordering holds across languages
pub struct KafkaBroker {
    config: KafkaConfig,
    producer: FutureProducer,
    transactional: Option<Arc<Mutex<FutureProducer>>>,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig) -> anyhow::Result<Self> {
        info!("Initializing Kafka producer...");
        let producer = Self::producer_config(config)?
            .create()
            .map_err(|e| anyhow::anyhow!("Failed to create Kafka producer: {}", e))?;

        let transactional = match &config.transactional_id {
            Some(transactional_id) => {
                let producer: FutureProducer = Self::producer_config(config)?
                    .set("transactional.id", transactional_id)
                    .create()
                    .map_err(|e| {
                        anyhow::anyhow!("Failed to create transactional producer: {}", e)
                    })?;
                producer
                    .init_transactions(TRANSACTION_TIMEOUT)
                    .map_err(|e| anyhow::anyhow!("Failed to init transactions: {}", e))?;
                info!(transactional_id = %transactional_id, "Transactional producer ready");
                Some(Arc::new(Mutex::new(producer)))
            }
            None => None,
        };

        info!(brokers = %config.brokers, "Kafka producer initialized");

        Ok(Self {
            config: config.clone(),
            producer,
            transactional,
        })
    }

    fn producer_config(config: &KafkaConfig) -> anyhow::Result<rdkafka::ClientConfig> {
        let mut client_config = create_client_config(config)?;
        client_config
            .set("acks", &config.producer_acks)
            .set(
                "enable.idempotence",
                if config.producer_enable_idempotence {
                    "true"
                } else {
                    "false"
                },
            )
            .set(
                "max.in.flight.requests.per.connection",
                config.producer_max_in_flight.to_string(),
            )
            .set("retries", config.producer_retries.to_string())
            .set("compression.type", &config.producer_compression)
            .set("linger.ms", config.producer_linger_ms.to_string())
            .set("batch.size", config.producer_batch_size.to_string())
            .set(
                "request.timeout.ms",
                config.producer_request_timeout_ms.to_string(),
            )
            .set(
                "delivery.timeout.ms",
                config.producer_delivery_timeout_ms.to_string(),
            )
            .set("partitioner", "murmur2_random");
        Ok(client_config)
    }

    /// Create any missing topic with the configured partitions/replication.
    /// Topics that already exist are left untouched.
    pub async fn ensure_topics(&self, topics: &[String]) -> anyhow::Result<()> {
        let admin: AdminClient<DefaultClientContext> = create_client_config(&self.config)?
            .create()
            .map_err(|e| anyhow::anyhow!("Failed to create Kafka admin client: {}", e))?;

        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|name| {
                NewTopic::new(
                    name,
                    self.config.partitions,
                    TopicReplication::Fixed(self.config.replication_factor),
                )
            })
            .collect();

        let results = admin
            .create_topics(&new_topics, &AdminOptions::new())
            .await
            .map_err(|e| anyhow::anyhow!("Topic creation failed: {}", e))?;

        for result in results {
            match result {
                Ok(topic) => info!(topic = %topic, "Created topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %topic, "Topic already exists")
                }
                Err((topic, code)) => {
                    anyhow::bail!("Failed to create topic {}: {:?}", topic, code)
                }
            }
        }
        Ok(())
    }
}

fn to_owned_headers(headers: &Headers) -> OwnedHeaders {
    headers.iter().fold(OwnedHeaders::new(), |acc, (key, value)| {
        acc.insert(Header {
            key: key.as_str(),
            value: Some(value.as_str()),
        })
    })
}

async fn send_with(
    producer: &FutureProducer,
    record: &OutboundRecord,
) -> Result<RecordMetadata, BrokerError> {
    let future_record = FutureRecord::to(&record.topic)
        .key(&record.key)
        .payload(&record.payload)
        .headers(to_owned_headers(&record.headers));

    match producer.send(future_record, Timeout::After(SEND_TIMEOUT)).await {
        Ok((partition, offset)) => Ok(RecordMetadata {
            topic: record.topic.clone(),
            partition,
            offset,
            timestamp: Utc::now(),
        }),
        Err((kafka_err, _)) => {
            error!(topic = %record.topic, error = %kafka_err, "Kafka send failed");
            Err(BrokerError::Send {
                topic: record.topic.clone(),
                reason: kafka_err.to_string(),
            })
        }
    }
}

#[async_trait]
impl LogBroker for KafkaBroker {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError> {
        send_with(&self.producer, &record).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError> {
        let producer = self
            .transactional
            .clone()
            .ok_or(BrokerError::TransactionsDisabled)?;
        // One open transaction per transactional.id
        let guard = producer.lock_owned().await;
        guard
            .begin_transaction()
            .map_err(|e| BrokerError::Transaction(e.to_string()))?;

        Ok(Box::new(KafkaTransaction {
            producer: Some(guard),
        }))
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut client_config =
            create_client_config(&self.config).map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let consumer: StreamConsumer<RebalanceForwarder> = client_config
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed")
            .set("allow.auto.create.topics", "true")
            .set("fetch.min.bytes", "1")
            .set("fetch.wait.max.ms", "500")
            .set("max.partition.fetch.bytes", "1048576")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create_with_context(RebalanceForwarder::new(listener))
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        info!(group = %group, topics = ?topics, "Kafka consumer subscribed");

        Ok(Box::new(KafkaSubscription { consumer }))
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Send {
                topic: "*".to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| BrokerError::Send {
                topic: "*".to_string(),
                reason: e.to_string(),
            })
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer<RebalanceForwarder>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn recv(&mut self) -> Result<InboundRecord, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Receive(e.to_string()))?;

        let mut headers = Headers::new();
        if let Some(raw) = message.headers() {
            for header in raw.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(InboundRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(|p| p.to_vec()),
            headers,
            timestamp,
        })
    }

    async fn commit(&mut self, record: &InboundRecord) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        // Leaving the group triggers the revoke callback
        self.consumer.unsubscribe();
        Ok(())
    }
}

struct KafkaTransaction {
    producer: Option<OwnedMutexGuard<FutureProducer>>,
}

impl KafkaTransaction {
    fn producer(&self) -> Result<&FutureProducer, BrokerError> {
        self.producer
            .as_deref()
            .ok_or_else(|| BrokerError::Transaction("transaction already finished".to_string()))
    }
}

#[async_trait]
impl BrokerTransaction for KafkaTransaction {
    async fn send(&mut self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError> {
        send_with(self.producer()?, &record).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), BrokerError> {
        let guard = self
            .producer
            .take()
            .ok_or_else(|| BrokerError::Transaction("transaction already finished".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let result = guard.commit_transaction(TRANSACTION_TIMEOUT);
            if result.is_err() {
                // Leave the producer usable for the next transaction
                if let Err(e) = guard.abort_transaction(TRANSACTION_TIMEOUT) {
                    warn!(error = %e, "Abort after failed commit also failed");
                }
            }
            result
        })
        .await
        .map_err(|e| BrokerError::Transaction(e.to_string()))?
        .map_err(|e| BrokerError::Transaction(e.to_string()))
    }

    async fn abort(mut self: Box<Self>) -> Result<(), BrokerError> {
        let guard = self
            .producer
            .take()
            .ok_or_else(|| BrokerError::Transaction("transaction already finished".to_string()))?;

        tokio::task::spawn_blocking(move || guard.abort_transaction(TRANSACTION_TIMEOUT))
            .await
            .map_err(|e| BrokerError::Transaction(e.to_string()))?
            .map_err(|e| BrokerError::Transaction(e.to_string()))
    }
}

impl Drop for KafkaTransaction {
    fn drop(&mut self) {
        if let Some(guard) = self.producer.take() {
            warn!("Transaction dropped without commit, aborting");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn_blocking(move || {
                    if let Err(e) = guard.abort_transaction(TRANSACTION_TIMEOUT) {
                        error!(error = %e, "Failed to abort dropped transaction");
                    }
                });
            }
        }
    }
}
