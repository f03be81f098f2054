// ============================================================================
// Completion Notifications
// ============================================================================
//
// Boundary to the push layer. The worker fires a `CompletionHook` once per
// successfully processed event; `BroadcastNotifier` fans those out on an
// in-process broadcast channel under a fixed channel name, which a
// WebSocket/STOMP relay would subscribe to.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::OrderPlacedEvent;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::worker::{EventProcessor, ProcessingError, RecordMeta};

/// Channel that completed-order notifications are pushed to
pub const NOTIFICATION_CHANNEL: &str = "/topic/notifications";

const DEFAULT_CAPACITY: usize = 1024;

#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completed(&self, event: &OrderPlacedEvent, meta: &RecordMeta);
}

/// Hook that does nothing
pub struct NoopHook;

#[async_trait]
impl CompletionHook for NoopHook {
    async fn on_completed(&self, _event: &OrderPlacedEvent, _meta: &RecordMeta) {}
}

/// A push to the notification channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: String,
    pub event: OrderPlacedEvent,
    pub completed_at: DateTime<Utc>,
}

pub struct BroadcastNotifier {
    channel: String,
    sender: broadcast::Sender<Notification>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            channel: NOTIFICATION_CHANNEL.to_string(),
            sender,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Push `event`; returns how many subscribers received it
    pub fn push(&self, event: &OrderPlacedEvent) -> usize {
        let notification = Notification {
            channel: self.channel.clone(),
            event: event.clone(),
            completed_at: Utc::now(),
        };
        match self.sender.send(notification) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(channel = %self.channel, order_id = %event.order_id, "No notification subscribers");
                0
            }
        }
    }
}

#[async_trait]
impl CompletionHook for BroadcastNotifier {
    async fn on_completed(&self, event: &OrderPlacedEvent, _meta: &RecordMeta) {
        self.push(event);
    }
}

/// Processor for the notification group.
///
/// Accepts every event. The push itself belongs to the worker's completion
/// hook, which fires only after the outcome is recorded.
#[derive(Debug, Default)]
pub struct NotificationRelay;

impl NotificationRelay {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventProcessor for NotificationRelay {
    async fn process(
        &self,
        event: &OrderPlacedEvent,
        meta: &RecordMeta,
    ) -> Result<(), ProcessingError> {
        info!(
            order_id = %event.order_id,
            status = %event.status,
            partition = meta.partition,
            offset = meta.offset,
            "Order event received for notification"
        );
        Ok(())
    }
}

/// Log every notification until the notifier is dropped; stands in for
/// the push transport in the worker binaries
pub fn spawn_push_logger(notifier: &BroadcastNotifier) -> JoinHandle<()> {
    let mut receiver = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(notification) => info!(
                    channel = %notification.channel,
                    order_id = %notification.event.order_id,
                    status = %notification.event.status,
                    "Pushed notification"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Notification logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn meta() -> RecordMeta {
        RecordMeta {
            topic: "orders".to_string(),
            partition: 0,
            offset: 0,
            attempt: 0,
            origin: "orders:0:0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_completion_pushes_on_fixed_channel() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let event = OrderPlacedEvent::new("o1", "c1", dec!(3.50), "OK");

        notifier.on_completed(&event, &meta()).await;

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.channel, "/topic/notifications");
        assert_eq!(pushed.event, event);
    }

    #[tokio::test]
    async fn test_relay_accepts_every_event() {
        let relay = NotificationRelay::new();
        let event = OrderPlacedEvent::new("o1", "c1", dec!(3.50), "FAIL");
        assert!(relay.process(&event, &meta()).await.is_ok());
    }

    #[tokio::test]
    async fn test_relay_does_not_push_by_itself() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let event = OrderPlacedEvent::new("o1", "c1", dec!(3.50), "OK");

        NotificationRelay::new().process(&event, &meta()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
