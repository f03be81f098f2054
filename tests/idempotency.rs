mod common;

use async_trait::async_trait;
use common::{order, Accept, Pipeline, Recorder, RunningWorker, TOPIC};
use courier::notification::{BroadcastNotifier, CompletionHook, NotificationRelay};
use courier::retry::BackoffPolicy;
use courier::worker::{IdempotencyStore, InMemoryIdempotencyStore, RecordMeta, TerminalOutcome};
use courier::{CourierResult, OrderPlacedEvent, PaymentProcessor};
use courier_config::{NOTIFICATION_GROUP, PAYMENT_GROUP};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_successful_order_notifies_once_and_never_dead_letters() {
    let pipeline = Pipeline::new(3, BackoffPolicy::default());
    let notifier = Arc::new(BroadcastNotifier::new(16));
    let mut notifications = notifier.subscribe();
    let recorder = Recorder::new(PaymentProcessor);

    let worker = RunningWorker::spawn(
        pipeline
            .worker(PAYMENT_GROUP, recorder.clone())
            .with_completion_hook(notifier.clone()),
    );
    pipeline.publisher.publish(&order("o1", "NEW")).await.unwrap();

    let pushed = tokio::time::timeout(Duration::from_secs(10), notifications.recv())
        .await
        .expect("no notification")
        .unwrap();
    assert_eq!(pushed.event.order_id, "o1");
    assert_eq!(pushed.channel, "/topic/notifications");

    tokio::time::sleep(Duration::from_millis(200)).await;
    worker.stop().await.unwrap();

    assert_eq!(recorder.calls().len(), 1);
    assert!(notifications.try_recv().is_err());
    assert!(pipeline.dead_letters().is_empty());
    assert!(pipeline
        .broker
        .records(pipeline.router.topics().retry_tier(1).unwrap())
        .is_empty());
}

/// Counts fires and hangs forever on the first one, standing in for a
/// process that dies after processing but before committing
struct HangOnFirstFire {
    fires: AtomicUsize,
}

#[async_trait]
impl CompletionHook for HangOnFirstFire {
    async fn on_completed(&self, _event: &OrderPlacedEvent, _meta: &RecordMeta) {
        if self.fires.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::test]
async fn test_redelivery_after_crash_does_not_reprocess() {
    let pipeline = Pipeline::new(1, BackoffPolicy::default());
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let hook = Arc::new(HangOnFirstFire {
        fires: AtomicUsize::new(0),
    });
    let recorder = Recorder::new(Accept);

    pipeline.publisher.publish(&order("o1", "NEW")).await.unwrap();

    let first = RunningWorker::spawn(
        pipeline
            .worker(PAYMENT_GROUP, recorder.clone())
            .with_idempotency_store(store.clone())
            .with_completion_hook(hook.clone()),
    );
    common::eventually("hook fired", || hook.fires.load(Ordering::SeqCst) == 1).await;
    assert_eq!(pipeline.broker.committed_offset(PAYMENT_GROUP, TOPIC, 0), None);

    // Crash: no graceful shutdown, no commit
    first.handle.abort();
    let _ = first.handle.await;
    common::wait_for_members(&pipeline.broker, PAYMENT_GROUP, 0).await;

    let second = RunningWorker::spawn(
        pipeline
            .worker(PAYMENT_GROUP, recorder.clone())
            .with_idempotency_store(store.clone())
            .with_completion_hook(hook.clone()),
    );
    common::eventually("redelivered record committed", || {
        pipeline.broker.committed_offset(PAYMENT_GROUP, TOPIC, 0) == Some(1)
    })
    .await;
    second.stop().await.unwrap();

    assert_eq!(recorder.calls().len(), 1, "processor ran again after redelivery");
    assert_eq!(hook.fires.load(Ordering::SeqCst), 1, "notification repeated");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_groups_keep_separate_idempotency_keys() {
    let pipeline = Pipeline::new(1, BackoffPolicy::default());
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let payments = Recorder::new(Accept);
    let audit = Recorder::new(Accept);

    let first = RunningWorker::spawn(
        pipeline
            .worker(PAYMENT_GROUP, payments.clone())
            .with_idempotency_store(store.clone()),
    );
    let second = RunningWorker::spawn(
        pipeline
            .worker("audit-group", audit.clone())
            .with_idempotency_store(store.clone()),
    );
    pipeline.publisher.publish(&order("o1", "NEW")).await.unwrap();

    payments.wait_for_calls(1).await;
    audit.wait_for_calls(1).await;
    first.stop().await.unwrap();
    second.stop().await.unwrap();

    assert_eq!(store.len(), 2);
}

/// Store whose first write never returns, leaving the process stuck between
/// processing an event and recording its outcome
struct StallFirstWrite {
    inner: InMemoryIdempotencyStore,
    writes: AtomicUsize,
}

#[async_trait]
impl IdempotencyStore for StallFirstWrite {
    async fn outcome(&self, key: &str) -> CourierResult<Option<TerminalOutcome>> {
        self.inner.outcome(key).await
    }

    async fn record(&self, key: &str, outcome: TerminalOutcome) -> CourierResult<bool> {
        if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        self.inner.record(key, outcome).await
    }
}

#[tokio::test]
async fn test_notification_group_pushes_once_across_crash() {
    let pipeline = Pipeline::new(1, BackoffPolicy::default());
    let store = Arc::new(StallFirstWrite {
        inner: InMemoryIdempotencyStore::new(),
        writes: AtomicUsize::new(0),
    });
    let notifier = Arc::new(BroadcastNotifier::new(16));
    let mut pushed = notifier.subscribe();

    pipeline.publisher.publish(&order("o1", "NEW")).await.unwrap();

    let first = RunningWorker::spawn(
        pipeline
            .worker(NOTIFICATION_GROUP, Arc::new(NotificationRelay::new()))
            .with_idempotency_store(store.clone())
            .with_completion_hook(notifier.clone()),
    );
    common::eventually("outcome write started", || store.writes.load(Ordering::SeqCst) == 1).await;
    assert!(pushed.try_recv().is_err(), "pushed before the outcome was recorded");

    first.handle.abort();
    let _ = first.handle.await;
    common::wait_for_members(&pipeline.broker, NOTIFICATION_GROUP, 0).await;

    let second = RunningWorker::spawn(
        pipeline
            .worker(NOTIFICATION_GROUP, Arc::new(NotificationRelay::new()))
            .with_idempotency_store(store.clone())
            .with_completion_hook(notifier.clone()),
    );
    common::eventually("redelivered record committed", || {
        pipeline.broker.committed_offset(NOTIFICATION_GROUP, TOPIC, 0) == Some(1)
    })
    .await;
    second.stop().await.unwrap();

    let mut count = 0;
    while let Ok(notification) = pushed.try_recv() {
        assert_eq!(notification.event.order_id, "o1");
        count += 1;
    }
    assert_eq!(count, 1, "notification repeated under redelivery");
}
