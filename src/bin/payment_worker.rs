// ============================================================================
// Payment Worker
// ============================================================================
//
// Consumes order events as `payment-group` (override with
// KAFKA_CONSUMER_GROUP). Failed payments walk the retry tiers (1s, 2s, 4s by
// default) and end in the dead-letter topic; completed payments are pushed to
// the notification channel.
//
// ============================================================================

use anyhow::Result;
use courier::app;
use courier::notification::{spawn_push_logger, BroadcastNotifier};
use courier::telemetry::init_tracing;
use courier::{Config, PaymentProcessor};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.logging)?;

    info!("=== Payment Worker Starting ===");
    info!("Kafka Brokers: {}", config.kafka.brokers);
    info!("Kafka Topic: {}", config.kafka.topic);
    info!("Consumer Group: {}", config.kafka.consumer_group);

    let notifier = Arc::new(BroadcastNotifier::default());
    let _push_logger = spawn_push_logger(&notifier);

    let group = config.kafka.consumer_group.clone();
    app::run_worker(&config, &group, Arc::new(PaymentProcessor), notifier).await?;

    info!("=== Payment Worker Stopped ===");
    Ok(())
}
