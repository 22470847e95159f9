//! Configuration management for Quotagate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::policy::{Operation, PlanTier, PolicyRow, SecondaryLimits};

/// Main configuration for the Quotagate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotagateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limit policy configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Per-round-trip store timeout in milliseconds. Kept short and
    /// separate from request timeouts: a slow store fails open rather
    /// than slowing the request path.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_store_timeout_ms() -> u64 {
    50
}

/// Rate limit policy configuration: the (operation, tier) table rows plus
/// the secondary dimension limits. Loaded once at startup; validated into
/// a `PolicyTable` before the server boots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// One row per (operation, tier) pair; the table must be exhaustive
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyRow>,

    /// Burst, source-address and global limits
    #[serde(default)]
    pub secondary: SecondaryLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            policies: default_policies(),
            secondary: SecondaryLimits::default(),
        }
    }
}

/// Built-in policy table covering every (operation, tier) pair.
fn default_policies() -> Vec<PolicyRow> {
    fn per_tier(operation: Operation, free: u64, standard: u64, premium: u64) -> [PolicyRow; 3] {
        let row = |tier, max_requests| PolicyRow {
            operation,
            tier,
            max_requests,
            window_secs: 60,
        };
        [
            row(PlanTier::Free, free),
            row(PlanTier::Standard, standard),
            row(PlanTier::Premium, premium),
        ]
    }

    let mut rows = Vec::new();
    rows.extend(per_tier(Operation::JournalSuggest, 30, 120, 600));
    rows.extend(per_tier(Operation::CsvImport, 5, 20, 100));
    rows.extend(per_tier(Operation::AiPredict, 10, 60, 300));
    rows.extend(per_tier(Operation::ReportExport, 10, 40, 200));
    rows
}

impl QuotagateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: QuotagateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::QuotagateError::Config(e.to_string()))?;
        Ok(config)
    }
}
