//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Key exchange failed.
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Envelope authentication failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid input length.
    #[error("Invalid input length: expected at least {expected}, got {actual}")]
    InvalidLength {
        /// Minimum expected length in bytes.
        expected: usize,
        /// Actual length received in bytes.
        actual: usize,
    },
}
