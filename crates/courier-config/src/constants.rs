// ============================================================================
// Configuration Constants
// ============================================================================

/// Main order event stream
pub const DEFAULT_TOPIC: &str = "order-placed-events";

/// Consumer group that processes payments (competing consumers)
pub const PAYMENT_GROUP: &str = "payment-group";

/// Consumer group that relays notifications (independent copy of the stream)
pub const NOTIFICATION_GROUP: &str = "notification-group";

// Retry policy: 1 original attempt + 3 retries, 1s, 2s, 4s apart
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

// Topic layout
pub(crate) const DEFAULT_PARTITIONS: i32 = 3;
// Single-broker development setup; production clusters use 3
pub(crate) const DEFAULT_REPLICATION_FACTOR: i32 = 1;

// Worker
pub(crate) const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub(crate) const DEFAULT_POLL_ERROR_BACKOFF_MS: u64 = 500;
// Terminal outcome markers outlive the topic retention (7 days) plus margin
pub(crate) const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 8 * 24 * 3600;
