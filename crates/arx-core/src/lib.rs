//! Protocol engine for the arx session layer.
//!
//! Sits between an untrusted transport and an application-packet
//! consumer: runs the five-state handshake (mutual challenge/response
//! plus Diffie-Hellman key agreement), derives direction-specific
//! cipher and MAC keys, and then relays encrypted traffic for the
//! remainder of the connection's life.
//!
//! The engine is synchronous and single-owner: each [`session::Session`]
//! is a pure function of (current state, next input) and performs no
//! I/O of its own.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod packet;
pub mod session;
pub mod transcript;

pub use error::{Error, Result};
pub use packet::{Packet, PacketType};
pub use session::{AppEndpoint, HandshakeState, Input, Output, Session};
