// ============================================================================
// Process Bootstrap
// ============================================================================
//
// Shared wiring for the binaries: Kafka connection and topic provisioning,
// idempotency store selection, signal handling and graceful shutdown.
//
// ============================================================================

use anyhow::{Context, Result};
use courier_config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::kafka::KafkaBroker;
use crate::notification::CompletionHook;
use crate::publisher::Publisher;
use crate::retry::{BackoffPolicy, RetryRouter, TopicSet};
use crate::worker::{
    ConsumerGroupWorker, EventProcessor, IdempotencyStore, InMemoryIdempotencyStore,
    RedisIdempotencyStore,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to Kafka and, if enabled, create the main, retry-tier and
/// dead-letter topics
pub async fn connect_kafka(config: &Config) -> Result<Arc<KafkaBroker>> {
    let broker = KafkaBroker::new(&config.kafka).context("Failed to initialize Kafka broker")?;

    if config.kafka.auto_create_topics {
        let topics = TopicSet::new(&config.kafka.topic, config.retry.max_attempts);
        broker
            .ensure_topics(&topics.all())
            .await
            .context("Failed to provision topics")?;
    }
    Ok(Arc::new(broker))
}

/// Redis store when `REDIS_URL` is set, otherwise a per-process store
pub async fn idempotency_store(config: &Config) -> Result<Arc<dyn IdempotencyStore>> {
    match &config.worker.redis_url {
        Some(url) => {
            let store = RedisIdempotencyStore::connect(url, config.worker.idempotency_ttl_secs)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("REDIS_URL not set, duplicate suppression is local to this process");
            Ok(Arc::new(local_idempotency_store(config)))
        }
    }
}

fn local_idempotency_store(config: &Config) -> InMemoryIdempotencyStore {
    InMemoryIdempotencyStore::with_ttl(Duration::from_secs(config.worker.idempotency_ttl_secs))
}

/// Resolves on SIGTERM or Ctrl-C
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown..."),
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received, initiating graceful shutdown..."),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler, Ctrl-C only"),
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl-C received, initiating graceful shutdown...");
}

/// Run one consumer group worker against Kafka until a shutdown signal,
/// then drain within the configured grace period
pub async fn run_worker(
    config: &Config,
    group: &str,
    processor: Arc<dyn EventProcessor>,
    hook: Arc<dyn CompletionHook>,
) -> Result<()> {
    let broker = connect_kafka(config).await?;
    let publisher = Arc::new(Publisher::new(broker.clone(), config.kafka.topic.clone()));
    let router = Arc::new(RetryRouter::new(
        publisher.clone(),
        BackoffPolicy::from_config(&config.retry),
    ));

    info!(
        group = %group,
        topic = %config.kafka.topic,
        max_attempts = config.retry.max_attempts,
        tier_delays_ms = ?router
            .policy()
            .tier_delays()
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect::<Vec<_>>(),
        "Starting consumer group worker"
    );

    let worker = ConsumerGroupWorker::new(broker, group, processor, router)
        .with_completion_hook(hook)
        .with_idempotency_store(idempotency_store(config).await?)
        .with_poll_error_backoff(Duration::from_millis(config.worker.poll_error_backoff_ms));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(worker.run(shutdown_rx));

    let finished = tokio::select! {
        joined = &mut handle => Some(joined),
        _ = shutdown_signal() => None,
    };

    let result = match finished {
        Some(joined) => joined.context("Worker task failed")?.map_err(anyhow::Error::from),
        None => {
            let _ = shutdown_tx.send(true);
            let grace = Duration::from_secs(config.worker.shutdown_grace_secs);
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => joined.context("Worker task failed")?.map_err(anyhow::Error::from),
                Err(_) => {
                    error!(grace_secs = grace.as_secs(), "Shutdown grace period exceeded, aborting");
                    handle.abort();
                    Ok(())
                }
            }
        }
    };

    if let Err(e) = publisher.flush(FLUSH_TIMEOUT).await {
        warn!(error = %e, "Producer flush failed during shutdown");
    }
    log_final_metrics();
    result
}

/// Dump the metrics registry once at exit
pub fn log_final_metrics() {
    match courier_metrics::gather_metrics() {
        Ok(text) => tracing::debug!(metrics = %text, "Final metrics snapshot"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_store_uses_configured_ttl() {
        let mut config = Config::local("localhost:9092");
        config.worker.idempotency_ttl_secs = 90;

        let store = local_idempotency_store(&config);
        assert_eq!(store.ttl(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_store_without_redis_is_local() {
        let mut config = Config::local("localhost:9092");
        config.worker.redis_url = None;

        let store = idempotency_store(&config).await.unwrap();
        assert!(store
            .record("g:orders:0:0", crate::worker::TerminalOutcome::Completed)
            .await
            .unwrap());
        assert!(!store
            .record("g:orders:0:0", crate::worker::TerminalOutcome::Completed)
            .await
            .unwrap());
    }
}
