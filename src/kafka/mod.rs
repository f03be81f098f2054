// ============================================================================
// Kafka Log Broker
// ============================================================================
//
// `LogBroker` implementation on top of rdkafka:
// - FutureProducer for plain sends (acks=all, idempotent)
// - Optional second producer with `transactional.id` for atomic batches
// - StreamConsumer per subscription, manual commits, read_committed
//
// ============================================================================

mod broker;
mod config;
mod context;

pub use broker::KafkaBroker;
pub use config::create_client_config;
pub use context::RebalanceForwarder;
