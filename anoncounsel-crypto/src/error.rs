//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in the encryption path.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The custody boundary could not produce a keypair. Fatal for the whole
    /// encryption path; there is no fallback key.
    #[error("key custody unavailable: {0}")]
    CustodyInitialization(String),

    /// The per-message key could not be wrapped for a recipient.
    #[error("key wrap failed: {0}")]
    KeyWrap(String),

    /// The envelope was not addressed to this identity or was tampered with.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// An unwrapped message key had the wrong size.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

impl CryptoError {
    /// True for tag or identity mismatches, which callers surface as a
    /// "cannot verify" state rather than a generic error.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, CryptoError::Authentication(_))
    }
}
