//! Prometheus metrics for Courier
//!
//! Provides centralized metrics collection for monitoring:
//! - Publish path (successes, failures, latency)
//! - Consume path (outcomes, duplicates skipped)
//! - Retry tiers and dead letters
//! - Circuit breaker state

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder, opts,
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
};

// ============================================================================
// Publish Metrics
// ============================================================================

/// Records acknowledged by the broker
pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_events_published_total",
        "Total number of records acknowledged by the broker"
    ))
    .expect("Failed to register EVENTS_PUBLISHED_TOTAL metric")
});

/// Publishes that failed after client-level retries
pub static PUBLISH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_publish_failures_total",
        "Total number of publishes reported as failed"
    ))
    .expect("Failed to register PUBLISH_FAILURES_TOTAL metric")
});

/// Time from send to broker acknowledgment
pub static PUBLISH_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "courier_publish_latency_seconds",
        "Publish latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register PUBLISH_LATENCY metric")
});

/// Publishes currently awaiting acknowledgment
pub static PUBLISH_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "courier_publish_in_flight",
        "Publishes awaiting broker acknowledgment"
    ))
    .expect("Failed to register PUBLISH_IN_FLIGHT metric")
});

// ============================================================================
// Consume Metrics
// ============================================================================

/// Processed records by stream and outcome (completed, retried, dead_lettered, skipped)
pub static RECORDS_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "courier_records_processed_total",
        "Records handled by consumer workers",
        &["topic", "outcome"]
    )
    .expect("Failed to register RECORDS_PROCESSED_TOTAL metric")
});

/// Retries scheduled per tier
pub static RETRIES_SCHEDULED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "courier_retries_scheduled_total",
        "Events re-published to a retry tier",
        &["tier"]
    )
    .expect("Failed to register RETRIES_SCHEDULED_TOTAL metric")
});

/// Dead-letter writes by reason (exhausted, malformed)
pub static DEAD_LETTERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "courier_dead_letters_total",
        "Records written to a dead-letter topic",
        &["reason"]
    )
    .expect("Failed to register DEAD_LETTERS_TOTAL metric")
});

/// Redeliveries whose terminal outcome was already recorded
pub static DUPLICATES_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_duplicates_skipped_total",
        "Redelivered records skipped by the idempotency store"
    ))
    .expect("Failed to register DUPLICATES_SKIPPED_TOTAL metric")
});

/// Transport errors seen by poll loops
pub static CONSUME_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_consume_errors_total",
        "Transport errors while polling"
    ))
    .expect("Failed to register CONSUME_ERRORS_TOTAL metric")
});

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Circuit breaker state (0=closed, 1=open, 2=half-open)
pub static CIRCUIT_BREAKER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "courier_circuit_breaker_state",
        "Publisher circuit breaker state (0=closed, 1=open, 2=half-open)"
    ))
    .expect("Failed to register CIRCUIT_BREAKER_STATE metric")
});

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        EVENTS_PUBLISHED_TOTAL.inc();
        RECORDS_PROCESSED_TOTAL
            .with_label_values(&["order-placed-events", "completed"])
            .inc();
        DEAD_LETTERS_TOTAL.with_label_values(&["exhausted"]).inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("courier_events_published_total"));
        assert!(text.contains("courier_records_processed_total"));
        assert!(text.contains("courier_dead_letters_total"));
    }
}
