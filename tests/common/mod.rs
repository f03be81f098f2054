#![allow(dead_code)]

use async_trait::async_trait;
use courier::broker::InMemoryBroker;
use courier::dead_letter::DeadLetterEntry;
use courier::retry::{BackoffPolicy, RetryRouter};
use courier::worker::{ConsumerGroupWorker, EventProcessor, ProcessingError, RecordMeta};
use courier::{CourierResult, OrderPlacedEvent, Publisher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const TOPIC: &str = "order-placed-events";

/// In-memory broker plus the publish and retry plumbing of one topic
pub struct Pipeline {
    pub broker: InMemoryBroker,
    pub publisher: Arc<Publisher>,
    pub router: Arc<RetryRouter>,
}

impl Pipeline {
    pub fn new(partitions: i32, policy: BackoffPolicy) -> Self {
        let broker = InMemoryBroker::new(partitions);
        let publisher = Arc::new(Publisher::new(Arc::new(broker.clone()), TOPIC));
        let router = Arc::new(RetryRouter::new(publisher.clone(), policy));
        Self {
            broker,
            publisher,
            router,
        }
    }

    pub fn worker(&self, group: &str, processor: Arc<dyn EventProcessor>) -> ConsumerGroupWorker {
        ConsumerGroupWorker::new(
            Arc::new(self.broker.clone()),
            group,
            processor,
            self.router.clone(),
        )
        .with_poll_error_backoff(Duration::from_millis(10))
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.broker
            .records(self.router.topics().dead_letter())
            .iter()
            .map(|record| DeadLetterEntry::decode(record).unwrap())
            .collect()
    }
}

pub fn order(order_id: &str, status: &str) -> OrderPlacedEvent {
    OrderPlacedEvent::new(order_id, "customer-1", rust_decimal::Decimal::new(4999, 2), status)
}

pub struct RunningWorker {
    shutdown: watch::Sender<bool>,
    pub handle: JoinHandle<CourierResult<()>>,
}

impl RunningWorker {
    pub fn spawn(worker: ConsumerGroupWorker) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));
        Self { shutdown, handle }
    }

    /// Request graceful shutdown and wait for the worker to finish
    pub async fn stop(self) -> CourierResult<()> {
        let _ = self.shutdown.send(true);
        tokio::time::timeout(Duration::from_secs(30), self.handle)
            .await
            .expect("worker did not stop")
            .expect("worker panicked")
    }
}

/// Poll `condition` until it holds, failing the test after 30s
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_members(broker: &InMemoryBroker, group: &str, count: usize) {
    eventually(&format!("{} members in {}", count, group), || {
        broker.member_count(group, TOPIC) == count
    })
    .await;
}

#[derive(Debug, Clone)]
pub struct Call {
    pub order_id: String,
    pub status: String,
    pub topic: String,
    pub partition: i32,
    pub attempt: u32,
    pub at: Instant,
}

/// Wraps a processor and records every invocation
pub struct Recorder<P> {
    inner: P,
    calls: Mutex<Vec<Call>>,
    changed: Notify,
}

impl<P> Recorder<P> {
    pub fn new(inner: P) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(Vec::new()),
            changed: Notify::new(),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, count: usize) -> Vec<Call> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                let calls = self.calls();
                if calls.len() >= count {
                    return calls;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(60), wait)
            .await
            .expect("timed out waiting for processor calls")
    }
}

#[async_trait]
impl<P: EventProcessor> EventProcessor for Recorder<P> {
    async fn process(
        &self,
        event: &OrderPlacedEvent,
        meta: &RecordMeta,
    ) -> Result<(), ProcessingError> {
        self.calls.lock().unwrap().push(Call {
            order_id: event.order_id.clone(),
            status: event.status.clone(),
            topic: meta.topic.clone(),
            partition: meta.partition,
            attempt: meta.attempt,
            at: Instant::now(),
        });
        self.changed.notify_waiters();
        self.inner.process(event, meta).await
    }
}

/// Succeeds for every event
pub struct Accept;

#[async_trait]
impl EventProcessor for Accept {
    async fn process(&self, _event: &OrderPlacedEvent, _meta: &RecordMeta) -> Result<(), ProcessingError> {
        Ok(())
    }
}

/// Fails for every event
pub struct Reject;

#[async_trait]
impl EventProcessor for Reject {
    async fn process(&self, _event: &OrderPlacedEvent, _meta: &RecordMeta) -> Result<(), ProcessingError> {
        Err(ProcessingError::new("rejected"))
    }
}
