//! Partition-ordered order event delivery.
//!
//! Publish path: [`publisher::Publisher`] appends events keyed by `order_id`
//! and reports each broker acknowledgment.
//!
//! Consume path: [`worker::ConsumerGroupWorker`] processes events at least
//! once, routing failures through [`retry::RetryRouter`] to delayed retry
//! tiers and finally to the dead-letter topic.

pub mod app;
pub mod broker;
pub mod dead_letter;
pub mod kafka;
pub mod notification;
pub mod payment;
pub mod publisher;
pub mod retry;
pub mod telemetry;
pub mod worker;

pub use broker::{InMemoryBroker, LogBroker};
pub use courier_config::Config;
pub use courier_error::{CourierError, CourierResult};
pub use courier_types::{
    DeadLetterRecord, DeliveryAttempt, DeliveryReceipt, MalformedRecord, OrderPlacedEvent,
    TopicPartition,
};
pub use kafka::KafkaBroker;
pub use notification::{BroadcastNotifier, CompletionHook, NotificationRelay, NOTIFICATION_CHANNEL};
pub use payment::PaymentProcessor;
pub use publisher::{PublishError, Publisher};
pub use retry::{BackoffPolicy, RetryRouter, TopicSet};
pub use worker::{ConsumerGroupWorker, EventProcessor, ProcessingError, RecordMeta};
