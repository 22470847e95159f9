//! Limit policy table.
//!
//! A static mapping of (operation, plan tier) to (max requests, window
//! length), plus the secondary dimension limits (burst, source address,
//! global). The table is validated exhaustively at startup: a missing
//! (operation, tier) row rejects boot instead of falling back to a
//! default at runtime.

use serde::{Deserialize, Serialize};

use crate::error::{QuotagateError, Result};

/// An API operation gated by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    JournalSuggest,
    CsvImport,
    AiPredict,
    ReportExport,
}

impl Operation {
    /// Every gated operation, in table order.
    pub const ALL: [Operation; 4] = [
        Operation::JournalSuggest,
        Operation::CsvImport,
        Operation::AiPredict,
        Operation::ReportExport,
    ];

    /// Stable string form, used in store keys and admin payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::JournalSuggest => "journal_suggest",
            Operation::CsvImport => "csv_import",
            Operation::AiPredict => "ai_predict",
            Operation::ReportExport => "report_export",
        }
    }

    /// Parse the stable string form back into an operation.
    pub fn parse(s: &str) -> Option<Self> {
        Operation::ALL.iter().copied().find(|o| o.as_str() == s)
    }

    fn index(&self) -> usize {
        Operation::ALL.iter().position(|o| o == self).unwrap_or(0)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A subscription plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Standard,
    Premium,
}

impl PlanTier {
    /// Every plan tier, in table order.
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Standard, PlanTier::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Standard => "standard",
            PlanTier::Premium => "premium",
        }
    }

    /// Parse the stable string form back into a tier.
    pub fn parse(s: &str) -> Option<Self> {
        PlanTier::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    fn index(&self) -> usize {
        PlanTier::ALL.iter().position(|t| t == self).unwrap_or(0)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single limit: maximum requests within a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// Maximum requests allowed in the window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

/// One configured row of the policy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRow {
    pub operation: Operation,
    pub tier: PlanTier,
    pub max_requests: u64,
    pub window_secs: u64,
}

/// Limits for the secondary dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SecondaryLimits {
    /// Short per-identity burst window
    #[serde(default = "default_burst")]
    pub burst: LimitPolicy,
    /// Per-source-address window
    #[serde(default = "default_source")]
    pub source: LimitPolicy,
    /// System-wide global window
    #[serde(default = "default_global")]
    pub global: LimitPolicy,
}

impl Default for SecondaryLimits {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            source: default_source(),
            global: default_global(),
        }
    }
}

fn default_burst() -> LimitPolicy {
    LimitPolicy {
        max_requests: 20,
        window_secs: 1,
    }
}

fn default_source() -> LimitPolicy {
    LimitPolicy {
        max_requests: 600,
        window_secs: 60,
    }
}

fn default_global() -> LimitPolicy {
    LimitPolicy {
        max_requests: 10_000,
        window_secs: 60,
    }
}

/// The validated, immutable policy table.
///
/// Stored as a dense operation x tier array so that lookups after
/// validation are infallible.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    limits: [[LimitPolicy; PlanTier::ALL.len()]; Operation::ALL.len()],
    secondary: SecondaryLimits,
}

impl PolicyTable {
    /// Build and validate a policy table from configured rows.
    ///
    /// Every (operation, tier) pair must appear exactly once with a
    /// positive limit and window; anything else is a boot failure.
    pub fn new(rows: &[PolicyRow], secondary: SecondaryLimits) -> Result<Self> {
        let mut limits = [[None::<LimitPolicy>; PlanTier::ALL.len()]; Operation::ALL.len()];

        for row in rows {
            if row.max_requests == 0 || row.window_secs == 0 {
                return Err(QuotagateError::Config(format!(
                    "policy for operation '{}' tier '{}' must have positive max_requests and window_secs",
                    row.operation, row.tier
                )));
            }
            let slot = &mut limits[row.operation.index()][row.tier.index()];
            if slot.is_some() {
                return Err(QuotagateError::Config(format!(
                    "duplicate policy row for operation '{}' tier '{}'",
                    row.operation, row.tier
                )));
            }
            *slot = Some(LimitPolicy {
                max_requests: row.max_requests,
                window_secs: row.window_secs,
            });
        }

        let mut table = [[LimitPolicy {
            max_requests: 0,
            window_secs: 0,
        }; PlanTier::ALL.len()]; Operation::ALL.len()];

        for op in Operation::ALL {
            for tier in PlanTier::ALL {
                match limits[op.index()][tier.index()] {
                    Some(policy) => table[op.index()][tier.index()] = policy,
                    None => {
                        return Err(QuotagateError::ConfigMissing {
                            operation: op.to_string(),
                            tier: tier.to_string(),
                        })
                    }
                }
            }
        }

        for (name, limit) in [
            ("burst", secondary.burst),
            ("source", secondary.source),
            ("global", secondary.global),
        ] {
            if limit.max_requests == 0 || limit.window_secs == 0 {
                return Err(QuotagateError::Config(format!(
                    "{} limit must have positive max_requests and window_secs",
                    name
                )));
            }
        }

        Ok(Self {
            limits: table,
            secondary,
        })
    }

    /// The identity-tier limit for an operation and plan tier.
    pub fn limit_for(&self, operation: Operation, tier: PlanTier) -> LimitPolicy {
        self.limits[operation.index()][tier.index()]
    }

    /// The per-identity burst limit.
    pub fn burst(&self) -> LimitPolicy {
        self.secondary.burst
    }

    /// The per-source-address limit.
    pub fn source(&self) -> LimitPolicy {
        self.secondary.source
    }

    /// The system-wide global limit.
    pub fn global(&self) -> LimitPolicy {
        self.secondary.global
    }

    /// Build a table with the same limit in every (operation, tier) slot.
    #[cfg(test)]
    pub(crate) fn uniform(max_requests: u64, window_secs: u64, secondary: SecondaryLimits) -> Self {
        let rows: Vec<PolicyRow> = Operation::ALL
            .iter()
            .flat_map(|&operation| {
                PlanTier::ALL.iter().map(move |&tier| PolicyRow {
                    operation,
                    tier,
                    max_requests,
                    window_secs,
                })
            })
            .collect();
        Self::new(&rows, secondary).unwrap()
    }
}
