//! Governance-level error taxonomy.
//!
//! Only genuinely fatal conditions surface as `Err`: a bad configuration or
//! registry at startup, or a storage fault during a cycle commit. A task
//! with no eligible agent and a whole-cycle circuit breaker are reported in
//! the cycle result, not raised.

use syndic_state::StorageError;

/// Errors produced by the governance core.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// Invalid thresholds or ordering at startup. Fatal; do not start.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persistence failure. Fatal to the cycle; in-memory state is rolled
    /// back, the process keeps running.
    #[error("storage fault: {0}")]
    Storage(#[from] StorageError),

    /// The registry cannot be reconstructed from the store. Fatal.
    #[error("registry inconsistency: {0}")]
    RegistryInconsistency(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::InvalidConfig("suppression >= trust".to_string());
        assert!(err.to_string().contains("invalid configuration"));

        let err = GovernanceError::RegistryInconsistency("trust out of range".to_string());
        assert!(err.to_string().contains("registry inconsistency"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let storage = StorageError::Backend("connection refused".to_string());
        let err: GovernanceError = storage.into();
        assert!(err.to_string().contains("storage fault"));
        assert!(err.to_string().contains("connection refused"));
    }
}
