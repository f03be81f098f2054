use courier_config::RetryConfig;
use std::time::Duration;

/// Exponential backoff: `delay(n) = base_delay * multiplier^n`
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
        )
    }

    /// Total attempts, original delivery included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Number of retry tiers (`max_attempts - 1`)
    pub fn retry_tiers(&self) -> u32 {
        self.max_attempts - 1
    }

    /// Delay after failed attempt `n` before attempt `n + 1` may run
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = self.multiplier.powi(n.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Delay of each retry tier, tier 1 first
    pub fn tier_delays(&self) -> Vec<Duration> {
        (0..self.retry_tiers()).map(|n| self.delay_for(n)).collect()
    }

    /// Delay associated with retry `tier` (1-based)
    pub fn tier_delay(&self, tier: u32) -> Duration {
        self.delay_for(tier.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(
            policy.tier_delays(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_each_delay_grows_by_multiplier() {
        let policy = BackoffPolicy::new(8, Duration::from_millis(250), 3.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        for n in 0..6 {
            let current = policy.delay_for(n).as_secs_f64();
            let next = policy.delay_for(n + 1).as_secs_f64();
            assert!((next - current * 3.0).abs() < 1e-9, "tier {}", n);
        }
    }

    #[test]
    fn test_single_attempt_has_no_tiers() {
        let policy = BackoffPolicy::new(1, Duration::from_secs(1), 2.0);
        assert_eq!(policy.retry_tiers(), 0);
        assert!(policy.tier_delays().is_empty());
    }

    #[test]
    fn test_huge_exponent_saturates() {
        let policy = BackoffPolicy::new(4, Duration::from_secs(1), 10.0);
        assert_eq!(policy.delay_for(400), Duration::MAX);
    }

    #[test]
    fn test_tier_delay_matches_previous_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.tier_delay(1), Duration::from_secs(1));
        assert_eq!(policy.tier_delay(3), Duration::from_secs(4));
    }
}
