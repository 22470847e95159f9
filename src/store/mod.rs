//! Counter store abstraction.
//!
//! The store is the only shared mutable resource in the system. It is
//! never read-modify-written from application memory: every mutating
//! operation is a single atomic store-side operation, so correctness
//! holds across process and instance boundaries without in-process locks.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by counter store implementations.
///
/// These never reach the request path as errors: counters and the grant
/// ledger catch them and degrade to fail-open.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store round-trip exceeded its deadline
    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    /// The store is unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Underlying Redis errors
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Result of an atomic prune-count-insert against a sliding log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingOutcome {
    /// Record count after the operation (includes the new record when admitted)
    pub count: u64,
    /// Whether the new record was inserted
    pub admitted: bool,
}

/// Trait for counter store implementations.
///
/// Each method must be atomic per call: concurrent callers observe a
/// consistent serialization, so at most one extra admission can occur
/// within the store's own transaction granularity.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically prune records older than `window_start_ms` from the
    /// sorted log at `key`, count the survivors, and insert `member`
    /// (scored `now_ms`) only when that count is strictly below `limit`.
    /// The key TTL is refreshed on insert. The limit rides inside the
    /// atomic unit because the conditional insert is decided store-side.
    async fn prune_count_insert(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        member: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<SlidingOutcome, StoreError>;

    /// Atomically increment the counter at `window_key`, setting the TTL
    /// only on the increment that creates the key. Subsequent increments
    /// must not refresh the TTL, otherwise a key under sustained traffic
    /// would live forever.
    async fn increment_window(&self, window_key: &str, ttl: Duration)
        -> Result<u64, StoreError>;

    /// Read a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value with an expiration.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
