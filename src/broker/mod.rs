// ============================================================================
// Log Broker Seam
// ============================================================================
//
// The durable, partitioned log is an external collaborator. Everything in the
// delivery core talks to it through `LogBroker`, so the same publisher, retry
// router and worker run against Kafka in production and against the
// in-memory log in tests.
//
// Contract highlights:
// - `send` resolves once the broker acknowledged the record (or failed after
//   client-level retries). It may complete on a broker I/O thread.
// - A `Subscription` belongs to one member of a consumer group. The broker
//   decides which partitions it owns and reports changes through the
//   `RebalanceListener`.
// - Offsets are committed explicitly, one record at a time, after handling.
//
// ============================================================================

pub mod memory;
pub mod partitioner;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{DeliveryReceipt, TopicPartition};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Header names used for retry bookkeeping
pub mod headers {
    /// Attempt number of this delivery (0 = original)
    pub const ATTEMPT: &str = "courier-attempt";
    /// Main topic the event was first published to
    pub const ORIGINAL_TOPIC: &str = "courier-original-topic";
    /// `topic:partition:offset` of the first delivery, stable across retries
    pub const ORIGIN: &str = "courier-origin";
    /// Earliest processing time, epoch milliseconds
    pub const DUE_AT: &str = "courier-due-at";
    /// Message of the failure that caused this retry
    pub const LAST_ERROR: &str = "courier-last-error";
    /// Why a record was dead-lettered: "exhausted" or "malformed"
    pub const DLT_REASON: &str = "courier-dlt-reason";
}

pub type Headers = BTreeMap<String, String>;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Send to {topic} failed: {reason}")]
    Send { topic: String, reason: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Transactions are not configured for this broker")]
    TransactionsDisabled,

    #[error("Broker client closed")]
    Closed,
}

impl From<BrokerError> for courier_error::CourierError {
    fn from(err: BrokerError) -> Self {
        courier_error::CourierError::Broker(err.to_string())
    }
}

/// A record to append to the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }
}

/// Broker acknowledgment: where the record landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
}

impl From<RecordMetadata> for DeliveryReceipt {
    fn from(meta: RecordMetadata) -> Self {
        DeliveryReceipt {
            topic: meta.topic,
            partition: meta.partition,
            offset: meta.offset,
            timestamp: meta.timestamp,
        }
    }
}

/// A record read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

impl InboundRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Stable identity of this record: `topic:partition:offset`
    pub fn coordinates(&self) -> String {
        format!("{}:{}:{}", self.topic, self.partition, self.offset)
    }
}

/// Partition ownership callbacks, invoked by the broker client
pub trait RebalanceListener: Send + Sync {
    fn on_partitions_assigned(&self, partitions: &[TopicPartition]);
    fn on_partitions_revoked(&self, partitions: &[TopicPartition]);
}

/// Listener that ignores rebalances
pub struct NoopRebalanceListener;

impl RebalanceListener for NoopRebalanceListener {
    fn on_partitions_assigned(&self, _partitions: &[TopicPartition]) {}
    fn on_partitions_revoked(&self, _partitions: &[TopicPartition]) {}
}

/// Shared handle to the log
#[async_trait]
pub trait LogBroker: Send + Sync {
    /// Append a record and wait for the broker acknowledgment
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError>;

    /// Start a transaction; records sent through it become visible on commit
    async fn begin_transaction(&self) -> Result<Box<dyn BrokerTransaction>, BrokerError>;

    /// Join `group` as a new member consuming `topics`
    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Wait for all outstanding sends to be acknowledged
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}

/// One member's view of a consumer group
#[async_trait]
pub trait Subscription: Send {
    /// Next record from an owned partition. Cancel-safe.
    async fn recv(&mut self) -> Result<InboundRecord, BrokerError>;

    /// Mark `record` (and everything before it in its partition) as consumed
    async fn commit(&mut self, record: &InboundRecord) -> Result<(), BrokerError>;

    /// Revoke owned partitions and leave the group
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

/// Scoped producer transaction
#[async_trait]
pub trait BrokerTransaction: Send {
    async fn send(&mut self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError>;
    async fn commit(self: Box<Self>) -> Result<(), BrokerError>;
    async fn abort(self: Box<Self>) -> Result<(), BrokerError>;
}
