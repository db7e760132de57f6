//! Shared sliding-window counter stores.
//!
//! Every store implements the same atomic contract for one key:
//!
//! 1. evict members scored `<= now_ms - window`
//! 2. insert a unique member scored `now_ms`
//! 3. read the cardinality
//! 4. set the key expiry to `2 × window`
//!
//! No caller ever observes a state between two of these steps.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Failure talking to the counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("counter store unreachable: {0}")]
    Unavailable(String),

    #[error("counter store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Short, bounded label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Command(_) => "command",
        }
    }
}

/// Atomic record-then-count operation on a sliding window.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one event at `now_ms` under `key` and return how many events
    /// the window ending at `now_ms` now holds, including this one.
    async fn record_and_count(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
    ) -> Result<u64, StoreError>;
}

/// Server-side script executing the four window steps as one unit.
const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
redis.call('ZADD', key, now, ARGV[3])
local count = redis.call('ZCARD', key)
redis.call('PEXPIRE', key, window * 2)
return count
";

/// Redis-backed store shared by every gateway process.
///
/// The connection is opened lazily on first use, so the gateway starts (and
/// fails open) even while Redis is down. Each request makes at most one
/// attempt: a failed connect is reported to that request only, and a
/// connection that breaks mid-command is dropped so the next request opens
/// a fresh one. Nothing reconnects in the background.
pub struct RedisCounterStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    script: redis::Script,
    timeout: Duration,
}

impl RedisCounterStore {
    /// Create a store for `url` without connecting.
    ///
    /// `timeout` bounds both the connect and each command response.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the URL cannot be parsed.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            timeout,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection_with_timeouts(self.timeout, self.timeout)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("Connected to quota store");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget a broken connection; the next request dials once more.
    async fn discard_connection(&self) {
        if self.connection.lock().await.take().is_some() {
            warn!("Quota store connection dropped");
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_and_count(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let member = format!("{now_ms}-{}", Uuid::new_v4());

        let result: Result<u64, redis::RedisError> = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await;

        let count = match result {
            Ok(count) => count,
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    self.discard_connection().await;
                    return Err(StoreError::Unavailable(e.to_string()));
                }
                return Err(StoreError::Command(e.to_string()));
            }
        };

        debug!(key, count, "Sliding window updated");
        Ok(count)
    }
}

/// In-process store with the same semantics as [`RedisCounterStore`].
///
/// Only meaningful for a single gateway process: tests and local runs.
/// Expired keys are dropped on every call, so idle subjects do not pile up.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, MemoryWindow>>,
}

struct MemoryWindow {
    timestamps: VecDeque<i64>,
    expires_at_ms: i64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, for tests.
    pub async fn len(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.windows.lock().await.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn record_and_count(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
    ) -> Result<u64, StoreError> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| w.expires_at_ms > now_ms);

        let entry = windows
            .entry(key.to_string())
            .or_insert_with(|| MemoryWindow {
                timestamps: VecDeque::new(),
                expires_at_ms: i64::MAX,
            });

        let cutoff = now_ms.saturating_sub(window_ms);
        entry.timestamps.retain(|&ts| ts > cutoff);

        // Keep the deque ordered even if callers pass a clock that went backwards.
        let position = entry.timestamps.partition_point(|&ts| ts <= now_ms);
        entry.timestamps.insert(position, now_ms);

        entry.expires_at_ms = now_ms.saturating_add(window_ms.saturating_mul(2));
        Ok(entry.timestamps.len() as u64)
    }
}
