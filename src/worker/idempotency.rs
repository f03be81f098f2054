// ============================================================================
// Idempotency Store
// ============================================================================
//
// Remembers the terminal outcome of every origin record a group has handled,
// so a redelivery after a crash (processed, not yet committed) does not repeat
// the terminal side effect.
//
// Key: `{group}:{origin}` where origin is `topic:partition:offset` of the
// first delivery. Retries carry the origin forward, so one logical event has
// one key regardless of which tier it finished on.
//
// Backends:
// - `InMemoryIdempotencyStore`: per process, for tests and single instances;
//   entries expire after the configured ttl
// - `RedisIdempotencyStore`: shared by every member of the group
//   (`SET key outcome NX EX ttl`)
//
// ============================================================================

use async_trait::async_trait;
use courier_error::{CourierError, CourierResult};
use redis::aio::MultiplexedConnection;
use redis::cmd;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info, warn};

const KEY_PREFIX: &str = "courier:outcome:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    DeadLettered,
}

impl TerminalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalOutcome::Completed => "completed",
            TerminalOutcome::DeadLettered => "dead_lettered",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "completed" => Some(TerminalOutcome::Completed),
            "dead_lettered" => Some(TerminalOutcome::DeadLettered),
            _ => None,
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Outcome already recorded for `key`, if any
    async fn outcome(&self, key: &str) -> CourierResult<Option<TerminalOutcome>>;

    /// Record `outcome` unless one exists. Returns `true` if this call
    /// recorded it.
    async fn record(&self, key: &str, outcome: TerminalOutcome) -> CourierResult<bool>;
}

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
struct OutcomeTable {
    outcomes: HashMap<String, (TerminalOutcome, Instant)>,
    /// Keys in insertion order; with a fixed ttl this is also expiry order
    expiries: VecDeque<(Instant, String)>,
}

impl OutcomeTable {
    fn prune(&mut self, now: Instant) {
        while let Some((expires_at, _)) = self.expiries.front() {
            if *expires_at > now {
                break;
            }
            if let Some((expires_at, key)) = self.expiries.pop_front() {
                if self.outcomes.get(&key).is_some_and(|(_, at)| *at == expires_at) {
                    self.outcomes.remove(&key);
                }
            }
        }
    }
}

/// Per-process store. Entries expire `ttl` after they are recorded, matching
/// the Redis store's `EX`.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    table: Mutex<OutcomeTable>,
    ttl: Duration,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            table: Mutex::new(OutcomeTable::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entries
    pub fn len(&self) -> usize {
        self.lock()
            .map(|mut table| {
                table.prune(Instant::now());
                table.outcomes.len()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> CourierResult<MutexGuard<'_, OutcomeTable>> {
        self.table
            .lock()
            .map_err(|_| CourierError::Unknown(anyhow::anyhow!("idempotency store poisoned")))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn outcome(&self, key: &str) -> CourierResult<Option<TerminalOutcome>> {
        let mut table = self.lock()?;
        table.prune(Instant::now());
        Ok(table.outcomes.get(key).map(|(outcome, _)| *outcome))
    }

    async fn record(&self, key: &str, outcome: TerminalOutcome) -> CourierResult<bool> {
        let now = Instant::now();
        let mut table = self.lock()?;
        table.prune(now);
        if table.outcomes.contains_key(key) {
            return Ok(false);
        }
        let expires_at = now + self.ttl;
        table.outcomes.insert(key.to_string(), (outcome, expires_at));
        table.expiries.push_back((expires_at, key.to_string()));
        Ok(true)
    }
}

type RedisFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, redis::RedisError>> + Send + 'a>>;

/// Redis-backed store shared across group members
pub struct RedisIdempotencyStore {
    client: redis::Client,
    conn: RwLock<MultiplexedConnection>,
    ttl_secs: u64,
}

impl RedisIdempotencyStore {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> CourierResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis idempotency store");
        Ok(Self {
            client,
            conn: RwLock::new(conn),
            ttl_secs,
        })
    }

    /// Run a Redis command, retrying with backoff and reconnecting once
    /// before the last attempt
    async fn execute_with_retry<F, T>(&self, operation_name: &str, mut operation: F) -> CourierResult<T>
    where
        F: for<'c> FnMut(&'c mut MultiplexedConnection) -> RedisFuture<'c, T>,
    {
        const MAX_RETRIES: u32 = 3;
        const INITIAL_BACKOFF_MS: u64 = 100;

        let mut attempt = 1;
        loop {
            let mut conn = self.conn.write().await;
            match operation(&mut conn).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt = attempt,
                            "Redis operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    drop(conn);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = MAX_RETRIES,
                        error = %e,
                        "Redis operation failed, will retry"
                    );

                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    if attempt == MAX_RETRIES - 1 {
                        match self.client.get_multiplexed_async_connection().await {
                            Ok(new_conn) => {
                                *self.conn.write().await = new_conn;
                                info!("Reconnected to Redis");
                            }
                            Err(reconnect_err) => {
                                error!(error = %reconnect_err, "Failed to reconnect to Redis");
                            }
                        }
                    }
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        operation = operation_name,
                        error = %e,
                        "Redis operation failed after retries"
                    );
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn outcome(&self, key: &str) -> CourierResult<Option<TerminalOutcome>> {
        let redis_key = format!("{}{}", KEY_PREFIX, key);
        let stored: Option<String> = self
            .execute_with_retry("get_outcome", |conn| {
                let key = redis_key.clone();
                Box::pin(async move { cmd("GET").arg(&key).query_async(conn).await })
            })
            .await?;
        Ok(stored.as_deref().and_then(TerminalOutcome::parse))
    }

    async fn record(&self, key: &str, outcome: TerminalOutcome) -> CourierResult<bool> {
        let redis_key = format!("{}{}", KEY_PREFIX, key);
        let ttl = self.ttl_secs;
        let reply: Option<String> = self
            .execute_with_retry("record_outcome", |conn| {
                let key = redis_key.clone();
                Box::pin(async move {
                    cmd("SET")
                        .arg(&key)
                        .arg(outcome.as_str())
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl)
                        .query_async(conn)
                        .await
                })
            })
            .await?;
        // SET NX replies OK when written, nil when the key exists
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = InMemoryIdempotencyStore::new();
        assert_eq!(store.outcome("g:orders:0:1").await.unwrap(), None);

        assert!(store
            .record("g:orders:0:1", TerminalOutcome::Completed)
            .await
            .unwrap());
        assert!(!store
            .record("g:orders:0:1", TerminalOutcome::DeadLettered)
            .await
            .unwrap());

        assert_eq!(
            store.outcome("g:orders:0:1").await.unwrap(),
            Some(TerminalOutcome::Completed)
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = InMemoryIdempotencyStore::with_ttl(Duration::from_secs(60));
        store.record("g:orders:0:1", TerminalOutcome::Completed).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        store.record("g:orders:0:2", TerminalOutcome::DeadLettered).await.unwrap();
        assert_eq!(store.len(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.outcome("g:orders:0:1").await.unwrap(), None);
        assert_eq!(
            store.outcome("g:orders:0:2").await.unwrap(),
            Some(TerminalOutcome::DeadLettered)
        );
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_stays_bounded_under_steady_traffic() {
        let store = InMemoryIdempotencyStore::with_ttl(Duration::from_secs(10));
        for i in 0..10_000 {
            store
                .record(&format!("g:orders:0:{}", i), TerminalOutcome::Completed)
                .await
                .unwrap();
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        // ttl / spacing = 1000 live entries at most
        assert!(store.len() <= 1000, "len = {}", store.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_can_be_recorded_again() {
        let store = InMemoryIdempotencyStore::with_ttl(Duration::from_secs(5));
        assert!(store.record("k", TerminalOutcome::Completed).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.record("k", TerminalOutcome::DeadLettered).await.unwrap());
        assert_eq!(
            store.outcome("k").await.unwrap(),
            Some(TerminalOutcome::DeadLettered)
        );
    }

    #[test]
    fn test_outcome_names_parse_back() {
        for outcome in [TerminalOutcome::Completed, TerminalOutcome::DeadLettered] {
            assert_eq!(TerminalOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(TerminalOutcome::parse("pending"), None);
    }
}
