//! Rate limiting logic: window counters, grant ledger, multi-tier gate.

mod fixed;
mod gate;
mod grants;
mod sliding;

pub use fixed::FixedWindowCounter;
pub use gate::{Dimension, GateDecision, LimitDecision, MultiTierGate};
pub use grants::{GrantLedger, TemporaryGrant};
pub use sliding::SlidingWindowCounter;

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Safety margin added to every window key TTL so that clock skew between
/// callers cannot expire a key while its window is still live.
pub(crate) const TTL_MARGIN: Duration = Duration::from_secs(5);

/// Outcome of a single dimension check.
#[derive(Debug, Clone, Copy)]
pub struct WindowCheck {
    pub allowed: bool,
    /// Count after the check (includes this request when admitted)
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// True when the store failed and the check degraded to fail-open
    pub degraded: bool,
}

impl WindowCheck {
    /// Fail-open result used when the store is unavailable: the request
    /// is allowed with the full limit reported as remaining.
    pub(crate) fn degraded(limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            count: 0,
            limit,
            remaining: limit,
            reset_at,
            degraded: true,
        }
    }
}
