//! In-memory counter store.
//!
//! Test double for the Redis store. Deterministic: expiry is evaluated
//! against an injected clock, and availability can be toggled to exercise
//! the fail-open path. Per-key atomicity comes from holding the map entry
//! for the duration of each operation, mirroring the atomicity the Redis
//! scripts provide server-side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::clock::Clock;

use super::{CounterStore, SlidingOutcome, StoreError};

/// Sorted log of (score_ms, member) records.
#[derive(Debug, Default)]
struct SlidingEntry {
    records: Vec<(i64, String)>,
    expires_at_ms: i64,
}

#[derive(Debug)]
struct FixedEntry {
    count: u64,
    expires_at_ms: i64,
}

#[derive(Debug)]
struct KvEntry {
    value: String,
    expires_at_ms: i64,
}

/// In-memory implementation of [`CounterStore`].
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    sliding: DashMap<String, SlidingEntry>,
    fixed: DashMap<String, FixedEntry>,
    kv: DashMap<String, KvEntry>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            available: AtomicBool::new(true),
            sliding: DashMap::new(),
            fixed: DashMap::new(),
            kv: DashMap::new(),
        }
    }

    /// Toggle availability. While unavailable every operation returns
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store marked unavailable".into()))
        }
    }

    /// Current count in a fixed-window key, honoring expiry.
    pub fn fixed_count(&self, window_key: &str) -> u64 {
        let now_ms = self.clock.now_millis();
        self.fixed
            .get(window_key)
            .filter(|e| e.expires_at_ms > now_ms)
            .map(|e| e.count)
            .unwrap_or(0)
    }

    /// Whether a fixed-window key is still live, honoring expiry.
    pub fn fixed_key_live(&self, window_key: &str) -> bool {
        let now_ms = self.clock.now_millis();
        self.fixed
            .get(window_key)
            .map(|e| e.expires_at_ms > now_ms)
            .unwrap_or(false)
    }

    /// Number of live records in a sliding log, honoring expiry.
    pub fn sliding_len(&self, key: &str) -> usize {
        let now_ms = self.clock.now_millis();
        self.sliding
            .get(key)
            .filter(|e| e.expires_at_ms > now_ms)
            .map(|e| e.records.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn prune_count_insert(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        member: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<SlidingOutcome, StoreError> {
        self.check_available()?;

        let clock_ms = self.clock.now_millis();
        let mut entry = self.sliding.entry(key.to_string()).or_default();

        if entry.expires_at_ms != 0 && entry.expires_at_ms <= clock_ms {
            entry.records.clear();
        }
        entry.records.retain(|(score, _)| *score >= window_start_ms);

        let count = entry.records.len() as u64;
        if count < limit {
            entry.records.push((now_ms, member.to_string()));
            entry.expires_at_ms = clock_ms + ttl.as_millis() as i64;
            Ok(SlidingOutcome {
                count: count + 1,
                admitted: true,
            })
        } else {
            Ok(SlidingOutcome {
                count,
                admitted: false,
            })
        }
    }

    async fn increment_window(
        &self,
        window_key: &str,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        self.check_available()?;

        let now_ms = self.clock.now_millis();
        let mut entry = self
            .fixed
            .entry(window_key.to_string())
            .or_insert_with(|| FixedEntry {
                count: 0,
                expires_at_ms: now_ms + ttl.as_millis() as i64,
            });

        if entry.expires_at_ms <= now_ms {
            // Expired key: this increment re-creates it
            entry.count = 0;
            entry.expires_at_ms = now_ms + ttl.as_millis() as i64;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;

        let now_ms = self.clock.now_millis();
        Ok(self
            .kv
            .get(key)
            .filter(|e| e.expires_at_ms > now_ms)
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;

        let now_ms = self.clock.now_millis();
        self.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at_ms: now_ms + ttl.as_millis() as i64,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;

        self.sliding.remove(key);
        self.fixed.remove(key);
        self.kv.remove(key);
        Ok(())
    }
}
