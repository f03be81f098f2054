// ============================================================================
// Consumer Group Worker
// ============================================================================
//
// Pulls order events for one consumer group, hands each to an
// `EventProcessor`, and only then commits the offset (at-least-once).
//
// - Processing failures go to the retry router instead of stopping the loop,
//   so one poison event cannot stall its partitions.
// - The main topic and every retry tier are consumed by separate loops.
// - Redeliveries of an already finished event are skipped via the
//   idempotency store.
//
// ============================================================================

mod consumer;
mod idempotency;
mod partitions;

pub use consumer::ConsumerGroupWorker;
pub use idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore, TerminalOutcome,
};
pub use partitions::{PartitionStats, PartitionTracker};

use async_trait::async_trait;
use courier_types::OrderPlacedEvent;
use thiserror::Error;

/// Business failure raised by a processor; drives the retry state machine
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Where the record being processed came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// 0 for the original delivery
    pub attempt: u32,
    /// Coordinates of the first delivery
    pub origin: String,
}

/// Application logic run for each consumed event
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &OrderPlacedEvent, meta: &RecordMeta)
        -> Result<(), ProcessingError>;
}
