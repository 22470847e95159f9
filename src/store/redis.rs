//! Redis-backed counter store.
//!
//! Each trait method is one round-trip. The two counter operations run as
//! Lua scripts so that prune-count-insert and create-with-TTL are atomic
//! on the server. Every call carries a short timeout, separate from the
//! request timeout, so a slow store degrades to fail-open instead of
//! stalling the request path.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::info;

use super::{CounterStore, SlidingOutcome, StoreError};

/// Prune expired records, count, and conditionally insert.
///
/// KEYS[1] sorted-set key; ARGV: window_start_ms, now_ms, member, limit,
/// ttl_ms. Returns {count_after, admitted}.
const SLIDING_SCRIPT: &str = r#"
local key = KEYS[1]
local window_start = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local member = ARGV[3]
local limit = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. window_start)
local count = redis.call('ZCARD', key)
if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, ttl)
    return {count + 1, 1}
end
return {count, 0}
"#;

/// Increment a fixed-window counter, setting the TTL only on creation.
///
/// KEYS[1] counter key; ARGV: ttl_ms. Returns the count after increment.
const FIXED_SCRIPT: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])

local count = redis.call('INCR', key)
if count == 1 then
    redis.call('PEXPIRE', key, ttl)
end
return count
"#;

/// Counter store backed by a shared Redis instance.
pub struct RedisStore {
    conn: MultiplexedConnection,
    timeout: Duration,
    sliding: Script,
    fixed: Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        info!(url = %url, "Connected to counter store");

        Ok(Self {
            conn,
            timeout,
            sliding: Script::new(SLIDING_SCRIPT),
            fixed: Script::new(FIXED_SCRIPT),
        })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Redis(e)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    fn ttl_millis(ttl: Duration) -> i64 {
        // PEXPIRE rejects non-positive TTLs
        (ttl.as_millis() as i64).max(1)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn prune_count_insert(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        member: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<SlidingOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let (count, admitted): (u64, u64) = self
            .with_timeout(
                self.sliding
                    .key(key)
                    .arg(window_start_ms)
                    .arg(now_ms)
                    .arg(member)
                    .arg(limit)
                    .arg(Self::ttl_millis(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(SlidingOutcome {
            count,
            admitted: admitted == 1,
        })
    }

    async fn increment_window(
        &self,
        window_key: &str,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(
            self.fixed
                .key(window_key)
                .arg(Self::ttl_millis(ttl))
                .invoke_async(&mut conn),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let millis = Self::ttl_millis(ttl) as u64;
        self.with_timeout(conn.pset_ex(key, value, millis)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.with_timeout(conn.del(key)).await
    }
}
