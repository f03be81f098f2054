use courier_error::{CourierError, CourierResult};
use courier_metrics::{CONSUME_ERRORS_TOTAL, DUPLICATES_SKIPPED_TOTAL, RECORDS_PROCESSED_TOTAL};
use courier_types::{DeliveryAttempt, OrderPlacedEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::idempotency::{IdempotencyStore, InMemoryIdempotencyStore, TerminalOutcome};
use super::partitions::PartitionTracker;
use super::{EventProcessor, RecordMeta};
use crate::broker::{BrokerError, InboundRecord, LogBroker, Subscription};
use crate::notification::{CompletionHook, NoopHook};
use crate::retry::{RetryDecision, RetryMetadata, RetryRouter};

const DEFAULT_POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// One member of a consumer group, consuming the main topic and every retry
/// tier of the router's topic set
pub struct ConsumerGroupWorker {
    broker: Arc<dyn LogBroker>,
    group: String,
    processor: Arc<dyn EventProcessor>,
    router: Arc<RetryRouter>,
    hook: Arc<dyn CompletionHook>,
    idempotency: Arc<dyn IdempotencyStore>,
    partitions: Arc<PartitionTracker>,
    poll_error_backoff: Duration,
}

impl ConsumerGroupWorker {
    pub fn new(
        broker: Arc<dyn LogBroker>,
        group: impl Into<String>,
        processor: Arc<dyn EventProcessor>,
        router: Arc<RetryRouter>,
    ) -> Self {
        Self {
            broker,
            group: group.into(),
            processor,
            router,
            hook: Arc::new(NoopHook),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            partitions: Arc::new(PartitionTracker::new()),
            poll_error_backoff: DEFAULT_POLL_ERROR_BACKOFF,
        }
    }

    /// Hook fired once per event that completed successfully
    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = store;
        self
    }

    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.poll_error_backoff = backoff;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn partitions(&self) -> Arc<PartitionTracker> {
        self.partitions.clone()
    }

    /// Consume until `shutdown` turns true (or its sender is dropped).
    ///
    /// Joins the group on every stream before the first poll. Returns an
    /// error if a stream loop had to stop because a retry or dead-letter
    /// write failed; that record stays uncommitted and is redelivered.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> CourierResult<()> {
        let streams = self.router.topics().consumed();
        let mut subscriptions = Vec::with_capacity(streams.len());
        for stream in &streams {
            let subscription = self
                .broker
                .subscribe(
                    std::slice::from_ref(stream),
                    &self.group,
                    self.partitions.clone(),
                )
                .await?;
            subscriptions.push((stream.clone(), subscription));
        }

        info!(group = %self.group, streams = ?streams, "Consumer group worker started");

        let (halt_tx, halt_rx) = watch::channel(false);
        let shared = Arc::new(self);
        let mut loops = JoinSet::new();
        for (stream, subscription) in subscriptions {
            let worker = shared.clone();
            let halt = halt_rx.clone();
            loops.spawn(async move { worker.consume_stream(stream, subscription, halt).await });
        }

        let mut first_error: Option<CourierError> = None;
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown), if !*halt_tx.borrow() => {
                    info!(group = %shared.group, "Shutdown requested, finishing in-flight records");
                    let _ = halt_tx.send(true);
                }
                joined = loops.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        e.log();
                        first_error.get_or_insert(e);
                        let _ = halt_tx.send(true);
                    }
                    Some(Err(join_err)) => {
                        error!(error = %join_err, "Stream loop panicked");
                        first_error.get_or_insert(CourierError::Unknown(anyhow::anyhow!(
                            "stream loop panicked: {}",
                            join_err
                        )));
                        let _ = halt_tx.send(true);
                    }
                }
            }
        }

        info!(group = %shared.group, "Consumer group worker stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn consume_stream(
        &self,
        stream: String,
        mut subscription: Box<dyn Subscription>,
        mut halt: watch::Receiver<bool>,
    ) -> CourierResult<()> {
        let result = loop {
            if *halt.borrow() {
                break Ok(());
            }

            let received = tokio::select! {
                biased;
                _ = halt.changed() => continue,
                received = subscription.recv() => received,
            };

            let record = match received {
                Ok(record) => record,
                Err(BrokerError::Closed) => {
                    info!(stream = %stream, "Broker closed, stream loop ending");
                    break Ok(());
                }
                Err(e) => {
                    CONSUME_ERRORS_TOTAL.inc();
                    warn!(stream = %stream, error = %e, "Poll failed");
                    tokio::select! {
                        _ = halt.changed() => {}
                        _ = tokio::time::sleep(self.poll_error_backoff) => {}
                    }
                    continue;
                }
            };

            let meta = RetryMetadata::from_record(&record, self.router.topics());
            if let Some(wait) = self.time_until_due(&record, &meta) {
                debug!(
                    stream = %stream,
                    offset = record.offset,
                    wait_ms = wait.as_millis() as u64,
                    "Waiting for retry to become due"
                );
                // Shutdown while waiting leaves the record uncommitted
                tokio::select! {
                    _ = halt.changed() => break Ok(()),
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            if let Err(e) = self.handle(subscription.as_mut(), &record, &meta).await {
                break Err(e);
            }
        };

        if let Err(e) = subscription.close().await {
            warn!(stream = %stream, error = %e, "Failed to close subscription cleanly");
        }
        result
    }

    /// Remaining wait before a retry-tier record may run, capped at the
    /// tier's delay so a skewed clock cannot park it indefinitely
    fn time_until_due(&self, record: &InboundRecord, meta: &RetryMetadata) -> Option<Duration> {
        let due_at = meta.due_at?;
        let remaining = (due_at - chrono::Utc::now()).to_std().ok()?;
        let tier = self
            .router
            .topics()
            .tier_of(&record.topic)
            .filter(|tier| *tier > 0)
            .unwrap_or(meta.attempt);
        let cap = self.router.policy().tier_delay(tier);
        let wait = remaining.min(cap);
        (!wait.is_zero()).then_some(wait)
    }

    async fn handle(
        &self,
        subscription: &mut dyn Subscription,
        record: &InboundRecord,
        meta: &RetryMetadata,
    ) -> CourierResult<()> {
        let outcome = match decode_event(record) {
            Ok(event) => self.process_event(record, meta, event).await?,
            Err(reason) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %reason,
                    "Undecodable record, not retrying"
                );
                self.router.route_malformed(record, &reason).await?;
                "malformed"
            }
        };

        self.partitions.record_handled(record);
        RECORDS_PROCESSED_TOTAL
            .with_label_values(&[record.topic.as_str(), outcome])
            .inc();

        if let Err(e) = subscription.commit(record).await {
            // Typically a revoked partition; the new owner sees it again
            // and the idempotency store absorbs the repeat
            CONSUME_ERRORS_TOTAL.inc();
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Offset commit failed"
            );
        }
        Ok(())
    }

    async fn process_event(
        &self,
        record: &InboundRecord,
        meta: &RetryMetadata,
        event: OrderPlacedEvent,
    ) -> CourierResult<&'static str> {
        let key = format!("{}:{}", self.group, meta.origin);

        if let Some(previous) = self.idempotency.outcome(&key).await? {
            DUPLICATES_SKIPPED_TOTAL.inc();
            info!(
                order_id = %event.order_id,
                origin = %meta.origin,
                outcome = previous.as_str(),
                "Redelivered event already finished, skipping"
            );
            return Ok("skipped");
        }

        let attempt = DeliveryAttempt::new(event, meta.attempt, self.router.policy().max_attempts());
        let record_meta = RecordMeta {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            attempt: attempt.attempt_number,
            origin: meta.origin.clone(),
        };

        match self.processor.process(&attempt.event, &record_meta).await {
            Ok(()) => {
                // Mark before notifying: a crash in between loses at most
                // the notification, never duplicates it
                if self
                    .idempotency
                    .record(&key, TerminalOutcome::Completed)
                    .await?
                {
                    self.hook.on_completed(&attempt.event, &record_meta).await;
                }
                info!(
                    order_id = %attempt.event.order_id,
                    topic = %record.topic,
                    attempt = attempt.attempt_number,
                    "Event processed"
                );
                Ok("completed")
            }
            Err(failure) => {
                let decision = self
                    .router
                    .route_failure(record, &attempt, meta, failure.message())
                    .await?;
                match decision {
                    RetryDecision::Retry { .. } => Ok("retried"),
                    RetryDecision::DeadLettered { .. } => {
                        self.idempotency
                            .record(&key, TerminalOutcome::DeadLettered)
                            .await?;
                        Ok("dead_lettered")
                    }
                }
            }
        }
    }
}

/// Decode a consumed payload; the error text is kept for the dead-letter entry
fn decode_event(record: &InboundRecord) -> Result<OrderPlacedEvent, String> {
    let payload = record
        .payload
        .as_deref()
        .ok_or_else(|| "record has no payload".to_string())?;
    let mut event: OrderPlacedEvent =
        serde_json::from_slice(payload).map_err(|e| e.to_string())?;

    if !event.has_order_id() {
        match record.key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => event.order_id = key.to_string(),
            None => return Err("event has no order id and record has no key".to_string()),
        }
    }
    Ok(event)
}

/// Resolves once `shutdown` reads true or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
