//! Fixed-window counter.
//!
//! One counter per discrete window epoch, O(1) per check. Approximate by
//! design: a burst straddling a window boundary can exceed the nominal
//! limit over a two-window span. Used for the burst, source-address and
//! global dimensions, where that slack is acceptable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::store::CounterStore;

use super::{WindowCheck, TTL_MARGIN};

pub struct FixedWindowCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowCounter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn window_key(key: &str, epoch: i64) -> String {
        format!("{}:{}", key, epoch)
    }

    fn epoch_bounds(&self, window_secs: u64) -> (i64, DateTime<Utc>) {
        let now_secs = self.clock.now().timestamp();
        let epoch = now_secs.div_euclid(window_secs as i64);
        let reset_secs = (epoch + 1) * window_secs as i64;
        let reset_at = Utc
            .timestamp_opt(reset_secs, 0)
            .single()
            .unwrap_or_else(Utc::now);
        (epoch, reset_at)
    }

    /// Check the limit for `key` within the current window epoch.
    ///
    /// The window key TTL is set by the increment that creates it and
    /// never refreshed, so sustained traffic cannot keep a key alive past
    /// its window.
    pub async fn check(&self, key: &str, window_secs: u64, limit: u64) -> WindowCheck {
        let (epoch, reset_at) = self.epoch_bounds(window_secs);
        let window_key = Self::window_key(key, epoch);
        let ttl = Duration::from_secs(window_secs) + TTL_MARGIN;

        match self.store.increment_window(&window_key, ttl).await {
            Ok(count) => {
                trace!(
                    key = %window_key,
                    count = count,
                    limit = limit,
                    "Fixed window check"
                );
                WindowCheck {
                    allowed: count <= limit,
                    count,
                    limit,
                    remaining: limit.saturating_sub(count),
                    reset_at,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    key = %window_key,
                    error = %e,
                    "Fixed window check failed, failing open"
                );
                WindowCheck::degraded(limit, reset_at)
            }
        }
    }

    /// Drop the counter for the current window epoch of `key`.
    pub async fn reset(&self, key: &str, window_secs: u64) -> Result<(), crate::store::StoreError> {
        let (epoch, _) = self.epoch_bounds(window_secs);
        self.store.delete(&Self::window_key(key, epoch)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn counter_at(epoch_start_secs: i64) -> (Arc<ManualClock>, Arc<MemoryStore>, FixedWindowCounter) {
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(epoch_start_secs, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let counter = FixedWindowCounter::new(store.clone(), clock.clone());
        (clock, store, counter)
    }

    #[tokio::test]
    async fn test_counts_within_window() {
        let (_clock, _store, counter) = counter_at(1_750_000_020);

        for i in 1..=3 {
            let check = counter.check("burst:alice", 10, 3).await;
            assert!(check.allowed);
            assert_eq!(check.count, i);
        }

        let check = counter.check("burst:alice", 10, 3).await;
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);
    }

    #[tokio::test]
    async fn test_new_epoch_new_counter() {
        let (clock, _store, counter) = counter_at(1_750_000_020);

        for _ in 0..3 {
            counter.check("burst:bob", 10, 3).await;
        }
        assert!(!counter.check("burst:bob", 10, 3).await.allowed);

        clock.advance_secs(10);
        let check = counter.check("burst:bob", 10, 3).await;
        assert!(check.allowed);
        assert_eq!(check.count, 1);
    }

    #[tokio::test]
    async fn test_reset_at_is_epoch_boundary() {
        // Window starts at a multiple of 60; clock sits 20s into it
        let (_clock, _store, counter) = counter_at(1_750_000_820);

        let check = counter.check("src:10.0.0.1", 60, 5).await;
        assert_eq!(check.reset_at.timestamp(), 1_750_000_860);
    }

    #[tokio::test]
    async fn test_key_expires_from_creation_not_last_increment() {
        let (clock, store, counter) = counter_at(1_750_000_800);

        counter.check("burst:carol", 60, 100).await;
        let epoch = 1_750_000_800 / 60;
        let window_key = format!("burst:carol:{}", epoch);

        // Keep incrementing through the window
        for _ in 0..5 {
            clock.advance_secs(10);
            counter.check("burst:carol", 60, 100).await;
        }

        // 60s window + 5s margin from creation; well past the last
        // increment the key must be gone
        clock.advance_secs(16);
        assert!(!store.fixed_key_live(&window_key));
    }

    #[tokio::test]
    async fn test_fail_open_on_store_error() {
        let (_clock, store, counter) = counter_at(1_750_000_000);
        store.set_available(false);

        let check = counter.check("global", 60, 1000).await;
        assert!(check.allowed);
        assert!(check.degraded);
        assert_eq!(check.remaining, 1000);
    }

    #[tokio::test]
    async fn test_reset_clears_current_epoch() {
        let (_clock, _store, counter) = counter_at(1_750_000_020);

        for _ in 0..3 {
            counter.check("burst:dave", 10, 3).await;
        }
        assert!(!counter.check("burst:dave", 10, 3).await.allowed);

        counter.reset("burst:dave", 10).await.unwrap();
        assert!(counter.check("burst:dave", 10, 3).await.allowed);
    }
}
