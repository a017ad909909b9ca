//! Error types for the protocol engine.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Protocol engine errors.
///
/// An `Err` returned from [`crate::session::Session::handle`] is fatal to
/// that session; recoverable conditions are logged and dropped instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough bytes to parse the expected structure.
    #[error("Insufficient data: need at least {0} bytes")]
    InsufficientData(usize),

    /// Malformed or unexpected-type packet.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Structurally valid input arriving where the protocol forbids it.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Underlying cryptographic failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] arx_crypto::Error),
}
