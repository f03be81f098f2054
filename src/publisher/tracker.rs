use courier_metrics::{
    EVENTS_PUBLISHED_TOTAL, PUBLISH_FAILURES_TOTAL, PUBLISH_IN_FLIGHT, PUBLISH_LATENCY,
};
use courier_types::DeliveryReceipt;
use std::fmt::Display;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error};

/// Snapshot of publish outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: u64,
    pub failed: u64,
    pub in_flight: i64,
    pub last_failure: Option<String>,
}

/// Correlates each send with its acknowledgment; observability only, it
/// never retries
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    sent: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicI64,
    last_failure: Mutex<Option<String>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a send that is about to start
    pub fn start<'a>(&'a self, topic: &'a str, key: &'a str) -> PendingDelivery<'a> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        PUBLISH_IN_FLIGHT.inc();
        PendingDelivery {
            tracker: self,
            topic,
            key,
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            last_failure: self
                .last_failure
                .lock()
                .map(|guard| guard.clone())
                .unwrap_or_default(),
        }
    }
}

/// One in-flight send; settles the in-flight count when dropped
pub struct PendingDelivery<'a> {
    tracker: &'a DeliveryTracker,
    topic: &'a str,
    key: &'a str,
    started: Instant,
}

impl PendingDelivery<'_> {
    pub fn acknowledged(self, receipt: &DeliveryReceipt) {
        let latency = self.started.elapsed();
        self.tracker.sent.fetch_add(1, Ordering::Relaxed);
        EVENTS_PUBLISHED_TOTAL.inc();
        PUBLISH_LATENCY.observe(latency.as_secs_f64());

        debug!(
            topic = %receipt.topic,
            partition = receipt.partition,
            offset = receipt.offset,
            key = %self.key,
            latency_ms = latency.as_millis() as u64,
            "Record acknowledged"
        );
    }

    pub fn failed(self, err: &dyn Display) {
        self.tracker.failed.fetch_add(1, Ordering::Relaxed);
        PUBLISH_FAILURES_TOTAL.inc();
        if let Ok(mut last) = self.tracker.last_failure.lock() {
            *last = Some(err.to_string());
        }

        error!(
            topic = %self.topic,
            key = %self.key,
            error = %err,
            latency_ms = self.started.elapsed().as_millis() as u64,
            "Publish failed"
        );
    }
}

impl Drop for PendingDelivery<'_> {
    fn drop(&mut self) {
        self.tracker.in_flight.fetch_sub(1, Ordering::Relaxed);
        PUBLISH_IN_FLIGHT.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_counts_outcomes() {
        let tracker = DeliveryTracker::new();

        let pending = tracker.start("orders", "o1");
        assert_eq!(tracker.stats().in_flight, 1);
        pending.acknowledged(&DeliveryReceipt {
            topic: "orders".to_string(),
            partition: 0,
            offset: 7,
            timestamp: Utc::now(),
        });

        tracker.start("orders", "o2").failed(&"broker unreachable");

        let stats = tracker.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.last_failure.as_deref(), Some("broker unreachable"));
    }

    #[test]
    fn test_abandoned_send_leaves_no_in_flight() {
        let tracker = DeliveryTracker::new();
        drop(tracker.start("orders", "o1"));
        let stats = tracker.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.sent + stats.failed, 0);
    }
}
