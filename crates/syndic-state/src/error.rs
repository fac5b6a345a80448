//! Error types for syndic-state

use thiserror::Error;

/// Errors that can occur in the governance persistence layer.
///
/// Every variant is a storage fault from the caller's point of view: the
/// governance loop treats any of these during a cycle commit as fatal to
/// that cycle and rolls its in-memory state back.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend connection or query error
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Agent not found
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// Trust score outside [0, 1]
    #[error("invalid trust score {score} for agent {agent_id}")]
    InvalidTrust { agent_id: String, score: f64 },

    /// Schema setup error
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
