// ============================================================================
// Notification Worker
// ============================================================================
//
// Consumes the same order events as `notification-group`, an independent
// copy of the stream. Each event is pushed to the notification channel by the
// completion hook, after its outcome is recorded.
//
// ============================================================================

use anyhow::Result;
use courier::app;
use courier::notification::{spawn_push_logger, BroadcastNotifier, NotificationRelay};
use courier::telemetry::init_tracing;
use courier::Config;
use courier_config::NOTIFICATION_GROUP;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.logging)?;

    info!("=== Notification Worker Starting ===");
    info!("Kafka Brokers: {}", config.kafka.brokers);
    info!("Kafka Topic: {}", config.kafka.topic);
    info!("Consumer Group: {}", NOTIFICATION_GROUP);

    let notifier = Arc::new(BroadcastNotifier::default());
    let _push_logger = spawn_push_logger(&notifier);

    app::run_worker(
        &config,
        NOTIFICATION_GROUP,
        Arc::new(NotificationRelay::new()),
        notifier,
    )
    .await?;

    info!("=== Notification Worker Stopped ===");
    Ok(())
}
