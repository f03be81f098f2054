// ============================================================================
// Retry Router
// ============================================================================
//
// State machine for a failing event:
//
//   ATTEMPT(n) --success--> COMPLETED
//   ATTEMPT(n) --failure, n < max-1--> ATTEMPT(n+1)   via {topic}-retry-{n+1}
//   ATTEMPT(n) --failure, n = max-1--> DEAD_LETTER    via {topic}-dlt
//
// Each retry tier is its own topic, so delayed retries never hold back fresh
// traffic on the main topic. The earliest processing time travels with the
// record in the `courier-due-at` header.
//
// ============================================================================

use chrono::Utc;
use courier_metrics::RETRIES_SCHEDULED_TOTAL;
use courier_types::{DeadLetterRecord, DeliveryAttempt, DeliveryReceipt, MalformedRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::metadata::RetryMetadata;
use super::policy::BackoffPolicy;
use super::topics::TopicSet;
use crate::broker::{headers, InboundRecord, OutboundRecord};
use crate::dead_letter::{DeadLetterSink, TopicDeadLetterSink};
use crate::publisher::{PublishError, Publisher};

const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempt(u32),
    Completed,
    DeadLetter,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptState::Attempt(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// Next state after `outcome` of `state`, with `max_attempts` total attempts
pub fn transition(state: AttemptState, outcome: AttemptOutcome, max_attempts: u32) -> AttemptState {
    match (state, outcome) {
        (AttemptState::Attempt(_), AttemptOutcome::Succeeded) => AttemptState::Completed,
        (AttemptState::Attempt(n), AttemptOutcome::Failed) if n.saturating_add(1) < max_attempts => {
            AttemptState::Attempt(n + 1)
        }
        (AttemptState::Attempt(_), AttemptOutcome::Failed) => AttemptState::DeadLetter,
        (terminal, _) => terminal,
    }
}

/// What the router did with a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        tier: u32,
        delay: Duration,
        /// Epoch milliseconds before which the retry must not run
        due_at_ms: i64,
        receipt: DeliveryReceipt,
    },
    DeadLettered {
        attempts_made: u32,
        receipt: DeliveryReceipt,
    },
}

pub struct RetryRouter {
    publisher: Arc<Publisher>,
    sink: Arc<dyn DeadLetterSink>,
    policy: BackoffPolicy,
    topics: TopicSet,
    publish_attempts: u32,
    publish_backoff: Duration,
}

impl RetryRouter {
    /// Router for the publisher's topic, dead-lettering to `{topic}-dlt`
    pub fn new(publisher: Arc<Publisher>, policy: BackoffPolicy) -> Self {
        let topics = TopicSet::new(publisher.topic(), policy.max_attempts());
        let sink = Arc::new(TopicDeadLetterSink::new(
            publisher.clone(),
            topics.dead_letter(),
        ));
        Self {
            publisher,
            sink,
            policy,
            topics,
            publish_attempts: PUBLISH_ATTEMPTS,
            publish_backoff: PUBLISH_INITIAL_BACKOFF,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Route a processing failure: schedule the next attempt on its retry
    /// tier, or dead-letter the event after the final attempt.
    ///
    /// Errors only if the retry or dead-letter write could not be published
    /// after local retries; the caller must then leave the record uncommitted.
    pub async fn route_failure(
        &self,
        record: &InboundRecord,
        attempt: &DeliveryAttempt,
        meta: &RetryMetadata,
        failure: &str,
    ) -> Result<RetryDecision, PublishError> {
        let next = transition(
            AttemptState::Attempt(attempt.attempt_number),
            AttemptOutcome::Failed,
            self.policy.max_attempts(),
        );

        match (next, self.topics.retry_tier(attempt.attempt_number.saturating_add(1))) {
            (AttemptState::Attempt(tier), Some(retry_topic)) => {
                let delay = self.policy.delay_for(attempt.attempt_number);
                let next_attempt = attempt.next(delay);
                let due_at_ms = Utc::now()
                    .timestamp_millis()
                    .saturating_add(delay.as_millis().min(i64::MAX as u128) as i64);

                let payload = serde_json::to_vec(&next_attempt.event)?;
                let outbound = OutboundRecord::new(retry_topic, &next_attempt.event.order_id, payload)
                    .with_header(headers::ATTEMPT, next_attempt.attempt_number.to_string())
                    .with_header(headers::ORIGINAL_TOPIC, &meta.original_topic)
                    .with_header(headers::ORIGIN, &meta.origin)
                    .with_header(headers::DUE_AT, due_at_ms.to_string())
                    .with_header(headers::LAST_ERROR, failure);

                let publisher = &self.publisher;
                let receipt = self
                    .publish_with_retry("schedule_retry", move || {
                        publisher.send_record(outbound.clone())
                    })
                    .await?;

                let tier_label = tier.to_string();
                RETRIES_SCHEDULED_TOTAL
                    .with_label_values(&[tier_label.as_str()])
                    .inc();
                warn!(
                    order_id = %attempt.event.order_id,
                    failed_attempt = attempt.attempt_number,
                    tier = tier,
                    delay_ms = delay.as_millis() as u64,
                    retry_topic = %receipt.topic,
                    error = %failure,
                    "Processing failed, retry scheduled"
                );

                Ok(RetryDecision::Retry {
                    tier,
                    delay,
                    due_at_ms,
                    receipt,
                })
            }
            _ => {
                let attempts_made = attempt.attempts_made();
                let entry = DeadLetterRecord {
                    event: attempt.event.clone(),
                    source_topic: meta.original_topic.clone(),
                    attempts_made,
                    timestamp: Utc::now(),
                    failure_reason: failure.to_string(),
                };
                let origin = meta.origin.clone();
                // Source of the failing delivery, for the log line only
                let consumed_from = record.coordinates();

                let sink = &self.sink;
                let receipt = self
                    .publish_with_retry("dead_letter", move || {
                        sink.write_exhausted(entry.clone(), origin.clone())
                    })
                    .await?;

                info!(
                    order_id = %attempt.event.order_id,
                    consumed_from = %consumed_from,
                    attempts_made = attempts_made,
                    "Retry sequence finished in dead-letter topic"
                );

                Ok(RetryDecision::DeadLettered {
                    attempts_made,
                    receipt,
                })
            }
        }
    }

    /// Send an undecodable record straight to the dead-letter topic
    pub async fn route_malformed(
        &self,
        record: &InboundRecord,
        decode_error: &str,
    ) -> Result<DeliveryReceipt, PublishError> {
        let entry = MalformedRecord {
            source_topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            raw_payload: record
                .payload
                .as_deref()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            error: decode_error.to_string(),
            timestamp: Utc::now(),
        };

        let sink = &self.sink;
        self.publish_with_retry("dead_letter_malformed", move || {
            sink.write_malformed(entry.clone())
        })
        .await
    }

    /// Repeat a transient publish failure with exponential backoff before
    /// giving up.
    ///
    /// These writes share the publisher's circuit breaker. While it is open
    /// the next try waits out the breaker's remaining open time instead of the
    /// short backoff, so it lands as the half-open probe.
    async fn publish_with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, PublishError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PublishError>>,
    {
        let mut backoff = self.publish_backoff;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt = attempt,
                            "Publish succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.publish_attempts => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = self.publish_attempts,
                        error = %e,
                        "Publish failed, will retry"
                    );
                    let wait = match e {
                        PublishError::CircuitOpen(retry_in) => backoff.max(retry_in),
                        _ => backoff,
                    };
                    tokio::time::sleep(wait).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %e,
                        "Publish failed, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Headers, InMemoryBroker};
    use crate::dead_letter::DeadLetterEntry;
    use crate::publisher::{CircuitBreakerConfig, CircuitState};
    use courier_types::OrderPlacedEvent;
    use rust_decimal_macros::dec;

    fn setup() -> (InMemoryBroker, RetryRouter) {
        let broker = InMemoryBroker::new(1);
        let publisher = Arc::new(Publisher::new(Arc::new(broker.clone()), "orders"));
        let router = RetryRouter::new(publisher, BackoffPolicy::default());
        (broker, router)
    }

    fn consumed(topic: &str, offset: i64) -> InboundRecord {
        InboundRecord {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: Some("o2".to_string()),
            payload: Some(b"{}".to_vec()),
            headers: Headers::new(),
            timestamp: Utc::now(),
        }
    }

    fn event() -> OrderPlacedEvent {
        OrderPlacedEvent::new("o2", "c1", dec!(5.00), "FAIL")
    }

    #[test]
    fn test_transition_table() {
        use AttemptOutcome::*;
        use AttemptState::*;

        assert_eq!(transition(Attempt(0), Succeeded, 4), Completed);
        assert_eq!(transition(Attempt(0), Failed, 4), Attempt(1));
        assert_eq!(transition(Attempt(2), Failed, 4), Attempt(3));
        assert_eq!(transition(Attempt(3), Failed, 4), DeadLetter);
        assert_eq!(transition(Attempt(0), Failed, 1), DeadLetter);
        assert_eq!(transition(Completed, Failed, 4), Completed);
        assert_eq!(transition(DeadLetter, Succeeded, 4), DeadLetter);
    }

    #[test]
    fn test_full_walk_takes_max_attempts() {
        let mut state = AttemptState::Attempt(0);
        let mut attempts = 0;
        while !state.is_terminal() {
            attempts += 1;
            state = transition(state, AttemptOutcome::Failed, 4);
        }
        assert_eq!(attempts, 4);
        assert_eq!(state, AttemptState::DeadLetter);
    }

    #[tokio::test]
    async fn test_first_failure_goes_to_tier_one() {
        let (broker, router) = setup();
        let record = consumed("orders", 5);
        let meta = RetryMetadata::from_record(&record, router.topics());
        let attempt = DeliveryAttempt::first(event(), 4);

        let decision = router
            .route_failure(&record, &attempt, &meta, "declined")
            .await
            .unwrap();

        match decision {
            RetryDecision::Retry { tier, delay, .. } => {
                assert_eq!(tier, 1);
                assert_eq!(delay, Duration::from_secs(1));
            }
            other => panic!("unexpected decision {:?}", other),
        }

        let retried = broker.records("orders-retry-1");
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].key.as_deref(), Some("o2"));
        assert_eq!(retried[0].header(headers::ATTEMPT), Some("1"));
        assert_eq!(retried[0].header(headers::ORIGIN), Some("orders:0:5"));
        assert_eq!(retried[0].header(headers::LAST_ERROR), Some("declined"));
        assert!(retried[0].header(headers::DUE_AT).is_some());
    }

    #[tokio::test]
    async fn test_final_failure_is_dead_lettered() {
        let (broker, router) = setup();
        let record = consumed("orders-retry-3", 0);
        let meta = RetryMetadata {
            attempt: 3,
            original_topic: "orders".to_string(),
            origin: "orders:0:5".to_string(),
            due_at: None,
        };
        let attempt = DeliveryAttempt::new(event(), 3, 4);

        let decision = router
            .route_failure(&record, &attempt, &meta, "declined")
            .await
            .unwrap();
        assert!(matches!(
            decision,
            RetryDecision::DeadLettered { attempts_made: 4, .. }
        ));

        let dead = broker.records("orders-dlt");
        assert_eq!(dead.len(), 1);
        match DeadLetterEntry::decode(&dead[0]).unwrap() {
            DeadLetterEntry::Exhausted(entry) => {
                assert_eq!(entry.attempts_made, 4);
                assert_eq!(entry.source_topic, "orders");
                assert_eq!(entry.event.order_id, "o2");
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_retry_waits_out_open_breaker() {
        let broker = InMemoryBroker::new(1);
        let publisher = Arc::new(
            Publisher::new(Arc::new(broker.clone()), "orders").with_circuit_breaker(
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    success_threshold: 1,
                    timeout: Duration::from_secs(1),
                    reset_timeout: Duration::from_secs(30),
                },
            ),
        );
        let router = RetryRouter::new(publisher.clone(), BackoffPolicy::default());
        let record = consumed("orders", 0);
        let meta = RetryMetadata::from_record(&record, router.topics());
        let attempt = DeliveryAttempt::first(event(), 4);

        // First write trips the breaker; the second try meets it open
        broker.fail_next_sends(1);
        let started = tokio::time::Instant::now();
        let decision = router
            .route_failure(&record, &attempt, &meta, "declined")
            .await
            .unwrap();

        assert!(matches!(decision, RetryDecision::Retry { tier: 1, .. }));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(publisher.circuit_state(), CircuitState::Closed);
        assert_eq!(broker.records("orders-retry-1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_publish_failure_is_retried_locally() {
        let (broker, router) = setup();
        let record = consumed("orders", 0);
        let meta = RetryMetadata::from_record(&record, router.topics());
        broker.fail_next_sends(2);

        let decision = router
            .route_failure(&record, &DeliveryAttempt::first(event(), 4), &meta, "declined")
            .await;
        assert!(decision.is_ok());
        assert_eq!(broker.records("orders-retry-1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_publish_failure_surfaces() {
        let (broker, router) = setup();
        let record = consumed("orders", 0);
        let meta = RetryMetadata::from_record(&record, router.topics());
        broker.fail_next_sends(3);

        let decision = router
            .route_failure(&record, &DeliveryAttempt::first(event(), 4), &meta, "declined")
            .await;
        assert!(matches!(decision, Err(PublishError::Broker(_))));
        assert!(broker.records("orders-retry-1").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_goes_straight_to_dlt() {
        let (broker, router) = setup();
        let mut record = consumed("orders", 8);
        record.payload = Some(b"{not json".to_vec());

        router.route_malformed(&record, "key must be a string").await.unwrap();

        assert!(broker.records("orders-retry-1").is_empty());
        let dead = broker.records("orders-dlt");
        assert_eq!(dead.len(), 1);
        match DeadLetterEntry::decode(&dead[0]).unwrap() {
            DeadLetterEntry::Malformed(entry) => {
                assert_eq!(entry.offset, 8);
                assert_eq!(entry.raw_payload, "{not json");
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }
}
