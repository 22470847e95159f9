//! Sliding-window log counter.
//!
//! Used for the primary per-identity limit. Stores one record per admitted
//! request in a store-side sorted log and prunes aged records on every
//! check, giving smooth accounting at a higher store cost than the fixed
//! window. Prune, count and conditional insert run as one atomic store
//! operation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::store::CounterStore;

use super::{WindowCheck, TTL_MARGIN};

pub struct SlidingWindowCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check the limit for `key`, admitting the request when fewer than
    /// `limit` records are younger than the window.
    ///
    /// A request that arrives exactly at the limit is rejected: admission
    /// requires a count strictly below `limit`. `reset_at` is reported as
    /// `now + window`, an approximate upper bound; computing the true
    /// reset would require scanning for the oldest record.
    pub async fn check(&self, key: &str, window_secs: u64, limit: u64) -> WindowCheck {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - (window_secs as i64) * 1000;
        let reset_at = now + ChronoDuration::seconds(window_secs as i64);

        // Timestamp plus random suffix keeps concurrent records distinct
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
        let ttl = Duration::from_secs(window_secs) + TTL_MARGIN;

        match self
            .store
            .prune_count_insert(key, window_start_ms, now_ms, &member, limit, ttl)
            .await
        {
            Ok(outcome) => {
                trace!(
                    key = %key,
                    count = outcome.count,
                    limit = limit,
                    admitted = outcome.admitted,
                    "Sliding window check"
                );
                WindowCheck {
                    allowed: outcome.admitted,
                    count: outcome.count,
                    limit,
                    remaining: limit.saturating_sub(outcome.count),
                    reset_at,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Sliding window check failed, failing open"
                );
                WindowCheck::degraded(limit, reset_at)
            }
        }
    }

    /// Drop the log for `key`, resetting its window.
    pub async fn reset(&self, key: &str) -> Result<(), crate::store::StoreError> {
        self.store.delete(key).await
    }
}
