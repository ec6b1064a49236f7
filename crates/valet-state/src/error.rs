// Error types for the state cache and document store

use thiserror::Error;

/// Result type alias for state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors from the durable store or the cache layered over it
#[derive(Debug, Error)]
pub enum StateError {
    /// Durable store operation failed
    #[error("store error: {0}")]
    Store(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StateError {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        StateError::Store(msg.into())
    }
}
