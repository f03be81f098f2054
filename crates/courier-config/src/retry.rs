// ============================================================================
// Retry Configuration
// ============================================================================

use anyhow::{Result, bail};

use crate::constants::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MULTIPLIER};
use crate::env::parse_or;

/// Retry policy for failed processing: attempt count and exponential backoff
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the original delivery
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Growth factor between successive retry delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Ok(Self {
            max_attempts: parse_or("RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", DEFAULT_BASE_DELAY_MS)?,
            multiplier: parse_or("RETRY_MULTIPLIER", DEFAULT_MULTIPLIER)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.base_delay_ms == 0 {
            bail!("RETRY_BASE_DELAY_MS must be greater than 0");
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            bail!("RETRY_MULTIPLIER must be a finite value >= 1.0");
        }
        Ok(())
    }
}
