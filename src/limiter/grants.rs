//! Temporary grant ledger.
//!
//! Time-bounded multiplier overrides keyed by (identity, operation), used
//! for promotions and manual unblocks. A grant is only ever replaced or
//! deleted, never mutated in place, and its expiry is revalidated on every
//! read: a grant with `expires_at <= now` is treated as absent even if the
//! store TTL has not reaped it yet.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{QuotagateError, Result};
use crate::policy::Operation;
use crate::store::CounterStore;

/// A stored grant: the multiplier applied to the base identity limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporaryGrant {
    pub multiplier: f64,
    pub expires_at: DateTime<Utc>,
}

pub struct GrantLedger {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl GrantLedger {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn key(identity: &str, operation: Operation) -> String {
        format!("grant:{}:{}", identity, operation)
    }

    /// Create or overwrite a grant.
    ///
    /// Administrative path: `InvalidGrant` for a multiplier at or below
    /// 1.0 or a zero duration, and store errors surface to the caller
    /// rather than degrading.
    pub async fn grant(
        &self,
        identity: &str,
        operation: Operation,
        multiplier: f64,
        duration: Duration,
    ) -> Result<()> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(QuotagateError::InvalidGrant(format!(
                "multiplier must be greater than 1.0, got {}",
                multiplier
            )));
        }
        if duration.is_zero() {
            return Err(QuotagateError::InvalidGrant(
                "duration must be positive".to_string(),
            ));
        }

        let grant = TemporaryGrant {
            multiplier,
            expires_at: self.clock.now() + chrono::Duration::from_std(duration).map_err(
                |e| QuotagateError::InvalidGrant(format!("duration out of range: {}", e)),
            )?,
        };
        let value = serde_json::to_string(&grant)?;

        self.store
            .set(&Self::key(identity, operation), &value, duration)
            .await?;

        debug!(
            identity = %identity,
            operation = %operation,
            multiplier = multiplier,
            expires_at = %grant.expires_at,
            "Temporary grant stored"
        );
        Ok(())
    }

    /// The multiplier currently in effect for (identity, operation).
    ///
    /// Returns 1.0 when no grant exists, the grant has expired, or the
    /// store is unavailable. Never cached: each request re-reads and
    /// re-checks expiry.
    pub async fn current_multiplier(&self, identity: &str, operation: Operation) -> f64 {
        let key = Self::key(identity, operation);
        match self.store.get(&key).await {
            Ok(Some(value)) => match serde_json::from_str::<TemporaryGrant>(&value) {
                Ok(grant) if grant.expires_at > self.clock.now() => grant.multiplier,
                Ok(_) => 1.0,
                Err(e) => {
                    warn!(key = %key, error = %e, "Malformed grant, ignoring");
                    1.0
                }
            },
            Ok(None) => 1.0,
            Err(e) => {
                warn!(key = %key, error = %e, "Grant lookup failed, using base limit");
                1.0
            }
        }
    }

    /// Delete any grant for (identity, operation).
    pub async fn revoke(&self, identity: &str, operation: Operation) -> Result<()> {
        self.store.delete(&Self::key(identity, operation)).await?;
        Ok(())
    }
}
