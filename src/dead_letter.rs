// ============================================================================
// Dead-Letter Sink
// ============================================================================
//
// Terminal store for records the worker gives up on:
// - exhausted: processing failed on every attempt (`DeadLetterRecord`)
// - malformed: the payload could not be decoded (`MalformedRecord`)
//
// Both go to `{topic}-dlt` with a `courier-dlt-reason` header and are logged
// at error level under the `dead_letter` target.
//
// ============================================================================

use async_trait::async_trait;
use courier_error::CourierError;
use courier_metrics::DEAD_LETTERS_TOTAL;
use courier_types::{DeadLetterRecord, DeliveryReceipt, MalformedRecord};
use std::sync::Arc;
use tracing::error;

use crate::broker::{headers, InboundRecord, OutboundRecord};
use crate::publisher::{PublishError, Publisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    Exhausted,
    Malformed,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Exhausted => "exhausted",
            DeadLetterReason::Malformed => "malformed",
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record an event that failed every attempt
    async fn write_exhausted(
        &self,
        entry: DeadLetterRecord,
        origin: String,
    ) -> Result<DeliveryReceipt, PublishError>;

    /// Record a payload that could not be decoded
    async fn write_malformed(&self, entry: MalformedRecord) -> Result<DeliveryReceipt, PublishError>;
}

/// Writes dead letters to a dead-letter topic through the publisher
pub struct TopicDeadLetterSink {
    publisher: Arc<Publisher>,
    topic: String,
}

impl TopicDeadLetterSink {
    pub fn new(publisher: Arc<Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl DeadLetterSink for TopicDeadLetterSink {
    async fn write_exhausted(
        &self,
        entry: DeadLetterRecord,
        origin: String,
    ) -> Result<DeliveryReceipt, PublishError> {
        let payload = serde_json::to_vec(&entry)?;
        let record = OutboundRecord::new(&self.topic, &entry.event.order_id, payload)
            .with_header(headers::DLT_REASON, DeadLetterReason::Exhausted.as_str())
            .with_header(headers::ORIGINAL_TOPIC, &entry.source_topic)
            .with_header(headers::ORIGIN, &origin);

        let receipt = self.publisher.send_record(record).await?;
        DEAD_LETTERS_TOTAL
            .with_label_values(&[DeadLetterReason::Exhausted.as_str()])
            .inc();

        error!(
            target: "dead_letter",
            order_id = %entry.event.order_id,
            source_topic = %entry.source_topic,
            attempts_made = entry.attempts_made,
            failure_reason = %entry.failure_reason,
            dlt_topic = %receipt.topic,
            dlt_offset = receipt.offset,
            "Event exhausted all attempts, moved to dead-letter topic"
        );
        Ok(receipt)
    }

    async fn write_malformed(&self, entry: MalformedRecord) -> Result<DeliveryReceipt, PublishError> {
        let payload = serde_json::to_vec(&entry)?;
        let key = entry
            .key
            .clone()
            .unwrap_or_else(|| format!("{}:{}:{}", entry.source_topic, entry.partition, entry.offset));
        let record = OutboundRecord::new(&self.topic, key, payload)
            .with_header(headers::DLT_REASON, DeadLetterReason::Malformed.as_str())
            .with_header(headers::ORIGINAL_TOPIC, &entry.source_topic);

        let receipt = self.publisher.send_record(record).await?;
        DEAD_LETTERS_TOTAL
            .with_label_values(&[DeadLetterReason::Malformed.as_str()])
            .inc();

        error!(
            target: "dead_letter",
            source_topic = %entry.source_topic,
            partition = entry.partition,
            offset = entry.offset,
            error = %entry.error,
            dlt_topic = %receipt.topic,
            "Undecodable record moved to dead-letter topic"
        );
        Ok(receipt)
    }
}

/// A decoded dead-letter topic entry
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterEntry {
    Exhausted(DeadLetterRecord),
    Malformed(MalformedRecord),
}

impl DeadLetterEntry {
    /// Decode a record read from a dead-letter topic
    pub fn decode(record: &InboundRecord) -> Result<Self, CourierError> {
        let payload = record
            .payload
            .as_deref()
            .ok_or_else(|| CourierError::Malformed(format!("{} has no payload", record.coordinates())))?;

        match record.header(headers::DLT_REASON) {
            Some("malformed") => Ok(DeadLetterEntry::Malformed(serde_json::from_slice(payload)?)),
            _ => Ok(DeadLetterEntry::Exhausted(serde_json::from_slice(payload)?)),
        }
    }

    pub fn reason(&self) -> DeadLetterReason {
        match self {
            DeadLetterEntry::Exhausted(_) => DeadLetterReason::Exhausted,
            DeadLetterEntry::Malformed(_) => DeadLetterReason::Malformed,
        }
    }
}
