//! Error types for the Quotagate service.

use thiserror::Error;

/// Main error type for Quotagate operations.
#[derive(Error, Debug)]
pub enum QuotagateError {
    /// Configuration-related errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// A (operation, plan tier) pair has no limit policy row
    #[error("Missing limit policy for operation '{operation}' tier '{tier}'")]
    ConfigMissing { operation: String, tier: String },

    /// Invalid administrative grant parameters
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotagateError>;
