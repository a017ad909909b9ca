//! Cryptographic primitives for the arx session protocol.
//!
//! This crate implements the cryptographic foundations of session
//! establishment:
//! - Keyed pseudorandom key expansion (the handshake KDF)
//! - Finite-field Diffie-Hellman key agreement over a peer-supplied group
//! - Authenticated envelope sealing/opening for established sessions
//!
//! Security requirements:
//! - No unsafe code
//! - All secrets use Zeroizing wrappers
//! - Constant-time comparisons via the subtle crate
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dh;
pub mod envelope;
pub mod error;
pub mod kdf;

pub use error::{Error, Result};
