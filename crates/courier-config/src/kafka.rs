// ============================================================================
// Kafka Configuration
// ============================================================================

use anyhow::Result;

use crate::constants::{DEFAULT_PARTITIONS, DEFAULT_REPLICATION_FACTOR, DEFAULT_TOPIC};
use crate::env::{optional, parse_or, string_or};

/// Kafka connection, topic layout and producer tuning
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Comma-separated list of Kafka brokers (e.g., "kafka1:9092,kafka2:9092")
    pub brokers: String,
    /// Main topic for order events
    pub topic: String,
    /// Consumer group ID for this worker process
    pub consumer_group: String,
    /// Partitions per topic when topics are created by the worker
    pub partitions: i32,
    pub replication_factor: i32,
    /// Create main, retry-tier and dead-letter topics on startup
    pub auto_create_topics: bool,
    pub ssl_enabled: bool,
    /// SASL mechanism (e.g., "SCRAM-SHA-256", "PLAIN")
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// Path to CA certificate file (for self-signed certificates)
    pub ssl_ca_location: Option<String>,
    /// Enables the transactional publish variant
    pub transactional_id: Option<String>,
    // producer-specific settings
    pub producer_compression: String, // "zstd" | "snappy" | "gzip" | "lz4" | "none"
    pub producer_acks: String,        // "all" | "1" | "0"
    pub producer_linger_ms: u32,
    pub producer_batch_size: u32,
    pub producer_max_in_flight: u32,
    pub producer_retries: u32,
    pub producer_request_timeout_ms: u32,
    pub producer_delivery_timeout_ms: u32,
    pub producer_enable_idempotence: bool,
}

impl KafkaConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Ok(Self {
            brokers: string_or("KAFKA_BROKERS", "localhost:9092"),
            topic: string_or("KAFKA_TOPIC", DEFAULT_TOPIC),
            consumer_group: string_or("KAFKA_CONSUMER_GROUP", crate::PAYMENT_GROUP),
            partitions: parse_or("KAFKA_PARTITIONS", DEFAULT_PARTITIONS)?,
            replication_factor: parse_or("KAFKA_REPLICATION_FACTOR", DEFAULT_REPLICATION_FACTOR)?,
            auto_create_topics: parse_or("KAFKA_AUTO_CREATE_TOPICS", true)?,
            ssl_enabled: parse_or("KAFKA_SSL_ENABLED", false)?,
            sasl_mechanism: optional("KAFKA_SASL_MECHANISM"),
            sasl_username: optional("KAFKA_SASL_USERNAME"),
            sasl_password: optional("KAFKA_SASL_PASSWORD"),
            ssl_ca_location: optional("KAFKA_SSL_CA_LOCATION"),
            transactional_id: optional("KAFKA_TRANSACTIONAL_ID"),
            producer_compression: string_or("KAFKA_PRODUCER_COMPRESSION", "snappy"),
            producer_acks: string_or("KAFKA_PRODUCER_ACKS", "all"),
            producer_linger_ms: parse_or("KAFKA_PRODUCER_LINGER_MS", 10)?,
            producer_batch_size: parse_or("KAFKA_PRODUCER_BATCH_SIZE", 16384)?,
            producer_max_in_flight: parse_or("KAFKA_PRODUCER_MAX_IN_FLIGHT", 5)?,
            producer_retries: parse_or("KAFKA_PRODUCER_RETRIES", 2147483647)?,
            producer_request_timeout_ms: parse_or("KAFKA_PRODUCER_REQUEST_TIMEOUT_MS", 30000)?,
            producer_delivery_timeout_ms: parse_or("KAFKA_PRODUCER_DELIVERY_TIMEOUT_MS", 120000)?,
            producer_enable_idempotence: parse_or("KAFKA_PRODUCER_ENABLE_IDEMPOTENCE", true)?,
        })
    }

    pub(crate) fn local(brokers: &str) -> Self {
        Self {
            brokers: brokers.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: crate::PAYMENT_GROUP.to_string(),
            partitions: DEFAULT_PARTITIONS,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            auto_create_topics: true,
            ssl_enabled: false,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
            transactional_id: None,
            producer_compression: "snappy".to_string(),
            producer_acks: "all".to_string(),
            producer_linger_ms: 10,
            producer_batch_size: 16384,
            producer_max_in_flight: 5,
            producer_retries: 2147483647,
            producer_request_timeout_ms: 30000,
            producer_delivery_timeout_ms: 120000,
            producer_enable_idempotence: true,
        }
    }
}
