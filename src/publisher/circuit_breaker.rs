// ============================================================================
// Circuit Breaker for Broker Sends
// ============================================================================
//
// A broker that is down makes every send wait for the full client timeout.
// After `failure_threshold` consecutive failures the breaker opens and sends
// fail fast with `Open` until `reset_timeout` has passed. The next call is a
// probe (half-open): `success_threshold` successes close the breaker again,
// any failure re-opens it.
//
// ============================================================================

use courier_metrics::CIRCUIT_BREAKER_STATE;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Successes in half-open state before it closes
    pub success_threshold: u32,
    /// Upper bound for a single guarded call
    pub timeout: Duration,
    /// Time spent open before a probe is let through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is OPEN, retry in {0:?}")]
    Open(Duration),

    #[error("Call exceeded {0:?}")]
    Timeout(Duration),

    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::Closed { failures: 0 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn set(&self, inner: &mut Inner, next: Inner) {
        *inner = next;
        let state = match inner {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        };
        CIRCUIT_BREAKER_STATE.set(state.gauge_value());
    }

    /// Reject immediately while open; move to half-open once the reset
    /// timeout has elapsed
    fn admit(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        if let Inner::Open { since } = *inner {
            let elapsed = since.elapsed();
            if elapsed < self.config.reset_timeout {
                return Err(self.config.reset_timeout - elapsed);
            }
            info!(
                elapsed_seconds = elapsed.as_secs(),
                "Circuit breaker attempting recovery (half-open)"
            );
            self.set(&mut inner, Inner::HalfOpen { successes: 0 });
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        match *inner {
            Inner::HalfOpen { successes } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    info!("Circuit breaker CLOSED, broker recovered");
                    self.set(&mut inner, Inner::Closed { failures: 0 });
                } else {
                    *inner = Inner::HalfOpen { successes };
                }
            }
            Inner::Closed { failures } if failures > 0 => {
                *inner = Inner::Closed { failures: 0 };
            }
            _ => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        match *inner {
            Inner::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    warn!(failures = failures, "Circuit breaker OPEN");
                    self.set(&mut inner, Inner::Open { since: Instant::now() });
                } else {
                    *inner = Inner::Closed { failures };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!("Probe failed, circuit breaker re-opened");
                self.set(&mut inner, Inner::Open { since: Instant::now() });
            }
            Inner::Open { .. } => {}
        }
    }

    /// Run `f` under breaker protection
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.admit() {
            return Err(CircuitBreakerError::Open(retry_in));
        }

        match tokio::time::timeout(self.config.timeout, f).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(err))
            }
            Err(_) => {
                self.record_failure();
                Err(CircuitBreakerError::Timeout(self.config.timeout))
            }
        }
    }
}
