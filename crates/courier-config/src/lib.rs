// ============================================================================
// Courier Config - Centralized configuration management
// ============================================================================
//
// Configuration for the publisher, the consumer workers and the binaries.
// Loaded from environment variables (and an optional .env file) with
// defaults matching the reference deployment: topic `order-placed-events`,
// 3 partitions, 4 delivery attempts backed off 1s, 2s, 4s.
//
// ============================================================================

mod constants;
mod env;
mod kafka;
mod logging;
mod retry;
mod worker;

pub use constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MULTIPLIER, DEFAULT_TOPIC,
    NOTIFICATION_GROUP, PAYMENT_GROUP,
};
pub use kafka::KafkaConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use retry::RetryConfig;
pub use worker::WorkerConfig;

use anyhow::Result;

/// Top-level configuration shared by all Courier binaries
#[derive(Clone, Debug)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            kafka: KafkaConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            worker: WorkerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };
        config.retry.validate()?;
        Ok(config)
    }

    /// Configuration with every default applied and no environment lookups
    pub fn local(brokers: &str) -> Self {
        Self {
            kafka: KafkaConfig::local(brokers),
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "KAFKA_TOPIC",
        "KAFKA_PARTITIONS",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_BASE_DELAY_MS",
        "RETRY_MULTIPLIER",
        "REDIS_URL",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = Config::from_env().unwrap();

        assert_eq!(config.kafka.topic, "order-placed-events");
        assert_eq!(config.kafka.partitions, 3);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.multiplier, 2.0);
        assert!(config.worker.redis_url.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear();
        std::env::set_var("KAFKA_TOPIC", "orders");
        std::env::set_var("RETRY_MAX_ATTEMPTS", "6");
        std::env::set_var("RETRY_MULTIPLIER", "3.5");

        let config = Config::from_env().unwrap();
        assert_eq!(config.kafka.topic, "orders");
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.multiplier, 3.5);
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_an_error() {
        clear();
        std::env::set_var("KAFKA_PARTITIONS", "three");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("KAFKA_PARTITIONS"));
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_retry_policy_is_rejected() {
        clear();
        std::env::set_var("RETRY_MAX_ATTEMPTS", "0");

        assert!(Config::from_env().is_err());
        clear();
    }
}
