//! Multi-tier gate.
//!
//! Orchestrates the four dimension checks for one request and aggregates
//! them into a single allow/deny decision. All four dimensions are always
//! evaluated, even when one has already denied: callers need accurate
//! remaining/reset values for every dimension, and skipping a check would
//! under-count real usage on a later request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::policy::{Operation, PlanTier, PolicyTable};
use crate::store::CounterStore;

use super::{FixedWindowCounter, GrantLedger, SlidingWindowCounter, WindowCheck};

/// The dimension a limit check ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Identity,
    Burst,
    Source,
    Global,
}

impl Dimension {
    /// Reporting precedence when several dimensions deny: a burst denial
    /// is the most actionable for the caller, a global denial the least.
    const PRECEDENCE: [Dimension; 4] = [
        Dimension::Burst,
        Dimension::Identity,
        Dimension::Source,
        Dimension::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Identity => "identity",
            Dimension::Burst => "burst",
            Dimension::Source => "source",
            Dimension::Global => "global",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decision for a single dimension, produced fresh per check.
#[derive(Debug, Clone, Copy)]
pub struct LimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub dimension: Dimension,
    /// True when the store failed and this check failed open
    pub degraded: bool,
}

impl LimitDecision {
    fn from_check(check: WindowCheck, dimension: Dimension) -> Self {
        Self {
            allowed: check.allowed,
            limit: check.limit,
            remaining: check.remaining,
            reset_at: check.reset_at,
            dimension,
            degraded: check.degraded,
        }
    }
}

/// Aggregate of all dimension decisions for one request.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub allowed: bool,
    /// One decision per dimension, in precedence order
    pub dimensions: Vec<LimitDecision>,
}

impl GateDecision {
    /// The decision that determined the outcome: the first denying
    /// dimension in precedence order, or the identity decision when the
    /// request was allowed.
    pub fn primary(&self) -> LimitDecision {
        if !self.allowed {
            for decision in &self.dimensions {
                if !decision.allowed {
                    return *decision;
                }
            }
        }
        self.dimensions
            .iter()
            .find(|d| d.dimension == Dimension::Identity)
            .copied()
            .unwrap_or(self.dimensions[0])
    }

    /// Whether any dimension degraded to fail-open.
    pub fn degraded(&self) -> bool {
        self.dimensions.iter().any(|d| d.degraded)
    }
}

/// The multi-tier gate: policy table, counters and grant ledger composed
/// into one `evaluate` entry point. Thread-safe; shared across handlers
/// behind an `Arc`.
pub struct MultiTierGate {
    policy: PolicyTable,
    sliding: SlidingWindowCounter,
    fixed: FixedWindowCounter,
    grants: GrantLedger,
    /// Checks that degraded to fail-open since startup
    degraded_events: AtomicU64,
}

impl MultiTierGate {
    pub fn new(policy: PolicyTable, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            sliding: SlidingWindowCounter::new(store.clone(), clock.clone()),
            fixed: FixedWindowCounter::new(store.clone(), clock.clone()),
            grants: GrantLedger::new(store, clock),
            degraded_events: AtomicU64::new(0),
        }
    }

    fn identity_key(identity: &str, operation: Operation) -> String {
        format!("rl:id:{}:{}", identity, operation)
    }

    fn burst_key(identity: &str) -> String {
        format!("rl:burst:{}", identity)
    }

    fn source_key(source_addr: &str) -> String {
        format!("rl:src:{}", source_addr)
    }

    const GLOBAL_KEY: &'static str = "rl:global";

    /// Evaluate all four dimensions for one request.
    pub async fn evaluate(
        &self,
        identity: &str,
        operation: Operation,
        source_addr: &str,
        tier: PlanTier,
    ) -> GateDecision {
        let base = self.policy.limit_for(operation, tier);
        let burst = self.policy.burst();
        let source = self.policy.source();
        let global = self.policy.global();

        // Grants multiply the limit actually enforced for the identity
        // dimension, not just the reported one
        let multiplier = self.grants.current_multiplier(identity, operation).await;
        let effective = (base.max_requests as f64 * multiplier).floor() as u64;

        let identity_key = Self::identity_key(identity, operation);
        let burst_key = Self::burst_key(identity);
        let source_key = Self::source_key(source_addr);
        let (identity_check, burst_check, source_check, global_check) = tokio::join!(
            self.sliding.check(
                &identity_key,
                base.window_secs,
                effective,
            ),
            self.fixed.check(
                &burst_key,
                burst.window_secs,
                burst.max_requests,
            ),
            self.fixed.check(
                &source_key,
                source.window_secs,
                source.max_requests,
            ),
            self.fixed
                .check(Self::GLOBAL_KEY, global.window_secs, global.max_requests),
        );

        let by_dimension = |dimension: Dimension| match dimension {
            Dimension::Identity => LimitDecision::from_check(identity_check, dimension),
            Dimension::Burst => LimitDecision::from_check(burst_check, dimension),
            Dimension::Source => LimitDecision::from_check(source_check, dimension),
            Dimension::Global => LimitDecision::from_check(global_check, dimension),
        };
        let dimensions: Vec<LimitDecision> =
            Dimension::PRECEDENCE.iter().map(|&d| by_dimension(d)).collect();

        let allowed = dimensions.iter().all(|d| d.allowed);
        let decision = GateDecision {
            allowed,
            dimensions,
        };

        if decision.degraded() {
            self.degraded_events.fetch_add(1, Ordering::Relaxed);
            warn!(
                identity = %identity,
                operation = %operation,
                "Gate evaluated in degraded mode, failing open"
            );
        }
        if !allowed {
            let primary = decision.primary();
            debug!(
                identity = %identity,
                operation = %operation,
                dimension = %primary.dimension,
                limit = primary.limit,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Evaluate and flatten into the decision that determined the outcome.
    pub async fn check_limit(
        &self,
        identity: &str,
        operation: Operation,
        source_addr: &str,
        tier: PlanTier,
    ) -> LimitDecision {
        self.evaluate(identity, operation, source_addr, tier)
            .await
            .primary()
    }

    /// Administrative: create or overwrite a temporary grant.
    pub async fn grant_temporary_increase(
        &self,
        identity: &str,
        operation: Operation,
        multiplier: f64,
        duration: Duration,
    ) -> Result<()> {
        self.grants
            .grant(identity, operation, multiplier, duration)
            .await
    }

    /// Administrative: revoke a temporary grant.
    pub async fn revoke_grant(&self, identity: &str, operation: Operation) -> Result<()> {
        self.grants.revoke(identity, operation).await
    }

    /// Administrative: reset the identity windows for one operation, or
    /// for all operations when `operation` is `None`. The identity burst
    /// window is reset as well.
    pub async fn reset_limits(&self, identity: &str, operation: Option<Operation>) -> Result<()> {
        let operations: Vec<Operation> = match operation {
            Some(op) => vec![op],
            None => Operation::ALL.to_vec(),
        };

        for op in operations {
            self.sliding
                .reset(&Self::identity_key(identity, op))
                .await?;
        }
        self.fixed
            .reset(&Self::burst_key(identity), self.policy.burst().window_secs)
            .await?;

        debug!(identity = %identity, "Limits reset");
        Ok(())
    }

    /// Number of checks that degraded to fail-open since startup.
    pub fn degraded_events(&self) -> u64 {
        self.degraded_events.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::{LimitPolicy, SecondaryLimits};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn secondary() -> SecondaryLimits {
        SecondaryLimits {
            burst: LimitPolicy {
                max_requests: 50,
                window_secs: 1,
            },
            source: LimitPolicy {
                max_requests: 1000,
                window_secs: 60,
            },
            global: LimitPolicy {
                max_requests: 10_000,
                window_secs: 60,
            },
        }
    }

    fn gate_with_limit(limit: u64) -> (Arc<ManualClock>, Arc<MemoryStore>, MultiTierGate) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let policy = PolicyTable::uniform(limit, 60, secondary());
        let gate = MultiTierGate::new(policy, store.clone(), clock.clone());
        (clock, store, gate)
    }

    #[tokio::test]
    async fn test_requests_within_limit_allowed() {
        let (_clock, _store, gate) = gate_with_limit(5);

        for expected_remaining in (0..5).rev() {
            let decision = gate
                .check_limit("alice", Operation::AiPredict, "10.0.0.1", PlanTier::Free)
                .await;
            assert!(decision.allowed);
            assert_eq!(decision.dimension, Dimension::Identity);
            assert_eq!(decision.remaining, expected_remaining);
        }
    }

    #[tokio::test]
    async fn test_sixth_request_rejected_then_window_rolls() {
        let (clock, _store, gate) = gate_with_limit(5);

        for _ in 0..5 {
            assert!(
                gate.check_limit("alice", Operation::AiPredict, "10.0.0.1", PlanTier::Free)
                    .await
                    .allowed
            );
        }

        clock.advance_secs(10);
        let decision = gate
            .check_limit("alice", Operation::AiPredict, "10.0.0.1", PlanTier::Free)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.dimension, Dimension::Identity);
        // resetAt is approximate: now + window
        assert_eq!(decision.reset_at, clock.now() + chrono::Duration::seconds(60));

        clock.advance_secs(51);
        assert!(
            gate.check_limit("alice", Operation::AiPredict, "10.0.0.1", PlanTier::Free)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_all_dimensions_reported() {
        let (_clock, _store, gate) = gate_with_limit(5);

        let decision = gate
            .evaluate("alice", Operation::CsvImport, "10.0.0.1", PlanTier::Free)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.dimensions.len(), 4);
        for d in &decision.dimensions {
            assert!(d.allowed);
            assert!(!d.degraded);
        }
    }

    #[tokio::test]
    async fn test_burst_denial_takes_precedence() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let mut limits = secondary();
        limits.burst = LimitPolicy {
            max_requests: 2,
            window_secs: 1,
        };
        // Identity limit of 2 as well, so both dimensions deny together
        let policy = PolicyTable::uniform(2, 60, limits);
        let gate = MultiTierGate::new(policy, store, clock);

        for _ in 0..2 {
            assert!(
                gate.check_limit("bob", Operation::AiPredict, "10.0.0.2", PlanTier::Free)
                    .await
                    .allowed
            );
        }

        let decision = gate
            .check_limit("bob", Operation::AiPredict, "10.0.0.2", PlanTier::Free)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.dimension, Dimension::Burst);
    }

    #[tokio::test]
    async fn test_denied_dimension_still_counts_others() {
        let (_clock, store, gate) = gate_with_limit(2);

        for _ in 0..4 {
            gate.check_limit("carol", Operation::AiPredict, "10.0.0.3", PlanTier::Free)
                .await;
        }

        // All four evaluations hit the burst window even though the
        // identity dimension denied the last two
        let epoch = Utc
            .with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
            .unwrap()
            .timestamp();
        assert_eq!(store.fixed_count(&format!("rl:burst:carol:{}", epoch)), 4);
    }

    #[tokio::test]
    async fn test_grant_doubles_effective_limit_until_expiry() {
        let (clock, _store, gate) = gate_with_limit(3);

        gate.grant_temporary_increase(
            "dave",
            Operation::AiPredict,
            2.0,
            Duration::from_secs(120),
        )
        .await
        .unwrap();

        for _ in 0..6 {
            assert!(
                gate.check_limit("dave", Operation::AiPredict, "10.0.0.4", PlanTier::Free)
                    .await
                    .allowed
            );
        }
        assert!(
            !gate
                .check_limit("dave", Operation::AiPredict, "10.0.0.4", PlanTier::Free)
                .await
                .allowed
        );

        // Past grant expiry and past the window: base limit again
        clock.advance_secs(121);
        for _ in 0..3 {
            assert!(
                gate.check_limit("dave", Operation::AiPredict, "10.0.0.4", PlanTier::Free)
                    .await
                    .allowed
            );
        }
        assert!(
            !gate
                .check_limit("dave", Operation::AiPredict, "10.0.0.4", PlanTier::Free)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_fail_open_when_store_down() {
        let (_clock, store, gate) = gate_with_limit(5);
        store.set_available(false);

        for _ in 0..20 {
            let decision = gate
                .check_limit("eve", Operation::AiPredict, "10.0.0.5", PlanTier::Free)
                .await;
            assert!(decision.allowed);
            assert!(decision.degraded);
            assert_eq!(decision.remaining, decision.limit);
        }
        assert_eq!(gate.degraded_events(), 20);
    }

    #[tokio::test]
    async fn test_concurrent_requests_admit_exactly_limit() {
        let (_clock, _store, gate) = gate_with_limit(5);
        let gate = Arc::new(gate);

        let mut handles = Vec::new();
        for _ in 0..12 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.check_limit("frank", Operation::AiPredict, "10.0.0.6", PlanTier::Free)
                    .await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_reset_limits_restores_quota() {
        let (_clock, _store, gate) = gate_with_limit(2);

        for _ in 0..2 {
            gate.check_limit("grace", Operation::CsvImport, "10.0.0.7", PlanTier::Free)
                .await;
        }
        assert!(
            !gate
                .check_limit("grace", Operation::CsvImport, "10.0.0.7", PlanTier::Free)
                .await
                .allowed
        );

        gate.reset_limits("grace", Some(Operation::CsvImport))
            .await
            .unwrap();
        assert!(
            gate.check_limit("grace", Operation::CsvImport, "10.0.0.7", PlanTier::Free)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_identities_isolated() {
        let (_clock, _store, gate) = gate_with_limit(2);

        for _ in 0..2 {
            gate.check_limit("heidi", Operation::AiPredict, "10.0.0.8", PlanTier::Free)
                .await;
        }
        assert!(
            !gate
                .check_limit("heidi", Operation::AiPredict, "10.0.0.8", PlanTier::Free)
                .await
                .allowed
        );

        // A different identity from the same address is unaffected
        assert!(
            gate.check_limit("ivan", Operation::AiPredict, "10.0.0.8", PlanTier::Free)
                .await
                .allowed
        );
    }
}
