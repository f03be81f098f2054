// ============================================================================
// Partitioned Publisher
// ============================================================================
//
// Appends order events to the log keyed by `order_id`, so every event of one
// order lands on the same partition and is consumed in publish order.
//
// - `publish` / `send` resolve once the broker acknowledged the record, or
//   report the failure. Nothing is dropped silently.
// - A circuit breaker fronts the broker so a dead cluster fails fast.
// - `publish_transactional` makes a batch of events visible only if the
//   caller's unit of work succeeds.
//
// ============================================================================

mod circuit_breaker;
mod tracker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use tracker::{DeliveryStats, DeliveryTracker, PendingDelivery};

use courier_error::CourierError;
use courier_types::{DeliveryReceipt, OrderPlacedEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::broker::{BrokerError, LogBroker, OutboundRecord};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Event rejected: {0}")]
    InvalidEvent(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker unavailable, circuit open (retry in {0:?})")]
    CircuitOpen(Duration),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
}

impl PublishError {
    /// Failures that may clear up if the same publish is repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PublishError::Broker(_) | PublishError::Timeout(_) | PublishError::CircuitOpen(_)
        )
    }
}

impl From<CircuitBreakerError<BrokerError>> for PublishError {
    fn from(err: CircuitBreakerError<BrokerError>) -> Self {
        match err {
            CircuitBreakerError::Open(retry_in) => PublishError::CircuitOpen(retry_in),
            CircuitBreakerError::Timeout(timeout) => PublishError::Timeout(timeout),
            CircuitBreakerError::Inner(err) => PublishError::Broker(err),
        }
    }
}

impl From<PublishError> for CourierError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::InvalidEvent(msg) => CourierError::Validation(msg),
            PublishError::Serialization(e) => CourierError::Json(e),
            err @ (PublishError::CircuitOpen(_) | PublishError::Timeout(_)) => {
                CourierError::Unavailable(err.to_string())
            }
            PublishError::Broker(e) => e.into(),
            PublishError::TransactionAborted(msg) => CourierError::TransactionAborted(msg),
        }
    }
}

pub struct Publisher {
    broker: Arc<dyn LogBroker>,
    topic: String,
    breaker: CircuitBreaker,
    tracker: DeliveryTracker,
}

impl Publisher {
    /// Publisher for `topic` with a default circuit breaker
    pub fn new(broker: Arc<dyn LogBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
            breaker: CircuitBreaker::default(),
            tracker: DeliveryTracker::new(),
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn broker(&self) -> &Arc<dyn LogBroker> {
        &self.broker
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Publish to the configured topic, keyed by `order_id`
    pub async fn publish(&self, event: &OrderPlacedEvent) -> Result<DeliveryReceipt, PublishError> {
        self.send(&self.topic, &event.order_id, event).await
    }

    /// Publish `event` to `topic` under `key`
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        event: &OrderPlacedEvent,
    ) -> Result<DeliveryReceipt, PublishError> {
        let record = encode(topic, key, event)?;
        self.send_record(record).await
    }

    /// Send a prepared record (used for retry-tier and dead-letter writes)
    pub async fn send_record(&self, record: OutboundRecord) -> Result<DeliveryReceipt, PublishError> {
        let topic = record.topic.clone();
        let key = record.key.clone();
        let pending = self.tracker.start(&topic, &key);

        match self.breaker.call(self.broker.send(record)).await {
            Ok(metadata) => {
                let receipt: DeliveryReceipt = metadata.into();
                pending.acknowledged(&receipt);
                Ok(receipt)
            }
            Err(err) => {
                let err = PublishError::from(err);
                pending.failed(&err);
                Err(err)
            }
        }
    }

    /// Publish `events` inside one broker transaction together with
    /// `unit_of_work`. The events become visible to `read_committed`
    /// consumers only if every send and the unit of work succeed; otherwise
    /// the transaction is aborted and nothing is visible.
    pub async fn publish_transactional<F, Fut, T>(
        &self,
        events: &[OrderPlacedEvent],
        unit_of_work: F,
    ) -> Result<(Vec<DeliveryReceipt>, T), PublishError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let records = events
            .iter()
            .map(|event| encode(&self.topic, &event.order_id, event))
            .collect::<Result<Vec<_>, _>>()?;

        let mut txn = self.broker.begin_transaction().await?;

        let mut receipts = Vec::with_capacity(records.len());
        for record in records {
            match txn.send(record).await {
                Ok(metadata) => receipts.push(DeliveryReceipt::from(metadata)),
                Err(err) => {
                    warn!(error = %err, "Send inside transaction failed, aborting");
                    txn.abort().await?;
                    return Err(PublishError::TransactionAborted(err.to_string()));
                }
            }
        }

        let outcome = match unit_of_work().await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Unit of work failed, aborting transaction");
                txn.abort().await?;
                return Err(PublishError::TransactionAborted(format!("{:#}", err)));
            }
        };

        txn.commit().await?;
        info!(count = receipts.len(), topic = %self.topic, "Transaction committed");

        Ok((receipts, outcome))
    }

    /// Wait for outstanding sends to be acknowledged
    pub async fn flush(&self, timeout: Duration) -> Result<(), PublishError> {
        self.broker.flush(timeout).await?;
        Ok(())
    }
}

fn encode(topic: &str, key: &str, event: &OrderPlacedEvent) -> Result<OutboundRecord, PublishError> {
    if key.trim().is_empty() {
        return Err(PublishError::InvalidEvent(
            "order_id must be set before publishing".to_string(),
        ));
    }
    let payload = serde_json::to_vec(event)?;
    Ok(OutboundRecord::new(topic, key, payload))
}
