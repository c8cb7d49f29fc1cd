//! Identity error types.

use thiserror::Error;

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors from the local keyed store and pseudonym provisioning.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("identity lock poisoned")]
    LockPoisoned,
}
