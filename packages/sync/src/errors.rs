//! Error types for the sync engine

use thiserror::Error;

/// Errors surfaced by the sync engine.
///
/// Clone is required so outcomes can be broadcast to every caller
/// awaiting the same in-flight save cycle.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// A proposed value failed a field validator. Resolved locally,
    /// never reaches the network.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A remote commit failed (network/server). Retryable.
    #[error("Save error: {0}")]
    Save(String),

    /// Retry budget exhausted. Requires an explicit user-triggered save.
    #[error("Save failed after {attempts} attempts: {message}")]
    Terminal { attempts: u32, message: String },

    /// Value could not be serialized for change detection or transport.
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Operation on an engine that has already been cleaned up.
    #[error("Sync engine is closed")]
    Closed,
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialize(e.to_string())
    }
}
