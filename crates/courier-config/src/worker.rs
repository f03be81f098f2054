// ============================================================================
// Worker Configuration
// ============================================================================

use anyhow::Result;

use crate::constants::{
    DEFAULT_IDEMPOTENCY_TTL_SECS, DEFAULT_POLL_ERROR_BACKOFF_MS, DEFAULT_SHUTDOWN_GRACE_SECS,
};
use crate::env::{optional, parse_or};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// How long in-flight processing may take after a shutdown signal
    pub shutdown_grace_secs: u64,
    /// Pause after a transport error before polling again
    pub poll_error_backoff_ms: u64,
    /// TTL of terminal-outcome markers in the idempotency store
    pub idempotency_ttl_secs: u64,
    /// Shared idempotency store; in-process store when unset
    pub redis_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            poll_error_backoff_ms: DEFAULT_POLL_ERROR_BACKOFF_MS,
            idempotency_ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
            redis_url: None,
        }
    }
}

impl WorkerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Ok(Self {
            shutdown_grace_secs: parse_or("WORKER_SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)?,
            poll_error_backoff_ms: parse_or(
                "WORKER_POLL_ERROR_BACKOFF_MS",
                DEFAULT_POLL_ERROR_BACKOFF_MS,
            )?,
            idempotency_ttl_secs: parse_or("IDEMPOTENCY_TTL_SECS", DEFAULT_IDEMPOTENCY_TTL_SECS)?,
            redis_url: optional("REDIS_URL"),
        })
    }
}
