//! Packet parsing and serialization.
//!
//! Wire format: a 5-byte header (1-byte type identifier, u32 body length)
//! followed by the body. All multi-byte integers are little-endian;
//! variable-length fields carry a u16 length prefix. Parsing is strict:
//! short bodies and trailing bytes are both rejected.

use crate::{Error, Result};

/// Fixed header length: type (1 byte) + body length (u32).
pub const HEADER_LEN: usize = 5;
/// Length of the random portion of a handshake challenge.
pub const CHALLENGE_LEN: usize = 12;
/// Length of a finished-message challenge result.
pub const RESULT_LEN: usize = 12;

// Packet type identifiers (1 byte)
/// Type identifier for ClientStart (0x01).
pub const TYPE_CLIENT_START: u8 = 0x01;
/// Type identifier for ServerStart (0x02).
pub const TYPE_SERVER_START: u8 = 0x02;
/// Type identifier for ClientChallengeXchg (0x03).
pub const TYPE_CLIENT_CHALLENGE_XCHG: u8 = 0x03;
/// Type identifier for ServerChallengeXchg (0x04).
pub const TYPE_SERVER_CHALLENGE_XCHG: u8 = 0x04;
/// Type identifier for ClientFinished (0x05).
pub const TYPE_CLIENT_FINISHED: u8 = 0x05;
/// Type identifier for ServerFinished (0x06).
pub const TYPE_SERVER_FINISHED: u8 = 0x06;
/// Type identifier for Encrypted (0x10).
pub const TYPE_ENCRYPTED: u8 = 0x10;
/// Type identifier for Data (0x20).
pub const TYPE_DATA: u8 = 0x20;

/// Packet type tag, mirroring the wire identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Handshake initiation from the client.
    ClientStart,
    /// Handshake acknowledgment from the server.
    ServerStart,
    /// Client challenge and Diffie-Hellman group parameters.
    ClientChallengeXchg,
    /// Server challenge and Diffie-Hellman public value.
    ServerChallengeXchg,
    /// Client public value and proof of key possession.
    ClientFinished,
    /// Server proof of key possession.
    ServerFinished,
    /// Sealed envelope carrying an encrypted packet.
    Encrypted,
    /// Opaque application payload.
    Data,
}

impl PacketType {
    /// Wire identifier for this type.
    pub fn to_u8(self) -> u8 {
        match self {
            PacketType::ClientStart => TYPE_CLIENT_START,
            PacketType::ServerStart => TYPE_SERVER_START,
            PacketType::ClientChallengeXchg => TYPE_CLIENT_CHALLENGE_XCHG,
            PacketType::ServerChallengeXchg => TYPE_SERVER_CHALLENGE_XCHG,
            PacketType::ClientFinished => TYPE_CLIENT_FINISHED,
            PacketType::ServerFinished => TYPE_SERVER_FINISHED,
            PacketType::Encrypted => TYPE_ENCRYPTED,
            PacketType::Data => TYPE_DATA,
        }
    }

    /// Map a wire identifier back to a type, if known.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            TYPE_CLIENT_START => Some(PacketType::ClientStart),
            TYPE_SERVER_START => Some(PacketType::ServerStart),
            TYPE_CLIENT_CHALLENGE_XCHG => Some(PacketType::ClientChallengeXchg),
            TYPE_SERVER_CHALLENGE_XCHG => Some(PacketType::ServerChallengeXchg),
            TYPE_CLIENT_FINISHED => Some(PacketType::ClientFinished),
            TYPE_SERVER_FINISHED => Some(PacketType::ServerFinished),
            TYPE_ENCRYPTED => Some(PacketType::Encrypted),
            TYPE_DATA => Some(PacketType::Data),
            _ => None,
        }
    }

    /// Whether this type belongs to the handshake phase.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            PacketType::ClientStart
                | PacketType::ServerStart
                | PacketType::ClientChallengeXchg
                | PacketType::ServerChallengeXchg
                | PacketType::ClientFinished
                | PacketType::ServerFinished
        )
    }
}

/// Protocol packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Handshake initiation.
    ClientStart {
        /// Client-chosen nonce, echoed back in ServerStart.
        nonce: u32,
    },

    /// Handshake acknowledgment.
    ServerStart {
        /// Echo of the client's nonce.
        nonce: u32,
        /// Server-chosen random value.
        server_nonce: u32,
    },

    /// Client challenge and group parameters.
    ClientChallengeXchg {
        /// Client unix timestamp (seconds).
        timestamp: u32,
        /// Client random challenge bytes.
        challenge: [u8; CHALLENGE_LEN],
        /// Diffie-Hellman modulus, little-endian.
        prime: Vec<u8>,
        /// Diffie-Hellman generator, little-endian.
        generator: Vec<u8>,
    },

    /// Server challenge and public value.
    ServerChallengeXchg {
        /// Server unix timestamp (seconds).
        timestamp: u32,
        /// Server random challenge bytes.
        challenge: [u8; CHALLENGE_LEN],
        /// Server Diffie-Hellman public value, little-endian.
        public_key: Vec<u8>,
    },

    /// Client public value and proof of key possession.
    ClientFinished {
        /// Client Diffie-Hellman public value, little-endian.
        public_key: Vec<u8>,
        /// Client challenge result.
        challenge_result: [u8; RESULT_LEN],
    },

    /// Server proof of key possession.
    ServerFinished {
        /// Server challenge result.
        challenge_result: [u8; RESULT_LEN],
    },

    /// Sealed envelope carrying an encrypted packet.
    Encrypted {
        /// Envelope bytes: sequence number, ciphertext, tag.
        envelope: Vec<u8>,
    },

    /// Opaque application payload.
    Data {
        /// Application bytes, not interpreted by the session.
        payload: Vec<u8>,
    },
}

impl Packet {
    /// The type tag of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ClientStart { .. } => PacketType::ClientStart,
            Packet::ServerStart { .. } => PacketType::ServerStart,
            Packet::ClientChallengeXchg { .. } => PacketType::ClientChallengeXchg,
            Packet::ServerChallengeXchg { .. } => PacketType::ServerChallengeXchg,
            Packet::ClientFinished { .. } => PacketType::ClientFinished,
            Packet::ServerFinished { .. } => PacketType::ServerFinished,
            Packet::Encrypted { .. } => PacketType::Encrypted,
            Packet::Data { .. } => PacketType::Data,
        }
    }

    /// Parse a packet from a full wire frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::InsufficientData(HEADER_LEN));
        }

        let packet_type = PacketType::from_u8(data[0]).ok_or_else(|| {
            Error::InvalidPacket(format!("Unknown packet type: 0x{:02X}", data[0]))
        })?;
        let body_len = read_u32_le(&data[1..5]) as usize;
        if data.len() < HEADER_LEN + body_len {
            return Err(Error::InsufficientData(HEADER_LEN + body_len));
        }
        if data.len() > HEADER_LEN + body_len {
            return Err(Error::InvalidPacket(format!(
                "{} trailing bytes after body",
                data.len() - HEADER_LEN - body_len
            )));
        }

        let body = &data[HEADER_LEN..];
        match packet_type {
            PacketType::ClientStart => Self::parse_client_start(body),
            PacketType::ServerStart => Self::parse_server_start(body),
            PacketType::ClientChallengeXchg => Self::parse_client_challenge_xchg(body),
            PacketType::ServerChallengeXchg => Self::parse_server_challenge_xchg(body),
            PacketType::ClientFinished => Self::parse_client_finished(body),
            PacketType::ServerFinished => Self::parse_server_finished(body),
            PacketType::Encrypted => Ok(Packet::Encrypted {
                envelope: body.to_vec(),
            }),
            PacketType::Data => Ok(Packet::Data {
                payload: body.to_vec(),
            }),
        }
    }

    /// Parse a packet and require a specific type.
    pub fn decode_expected(data: &[u8], expected: PacketType) -> Result<Self> {
        let packet = Self::decode(data)?;
        if packet.packet_type() != expected {
            return Err(Error::InvalidPacket(format!(
                "Expected {:?}, got {:?}",
                expected,
                packet.packet_type()
            )));
        }
        Ok(packet)
    }

    /// Serialize to a full wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.push(self.packet_type().to_u8());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    fn parse_client_start(body: &[u8]) -> Result<Self> {
        check_exact(body, 4)?;
        Ok(Packet::ClientStart {
            nonce: read_u32_le(&body[0..4]),
        })
    }

    fn parse_server_start(body: &[u8]) -> Result<Self> {
        check_exact(body, 8)?;
        Ok(Packet::ServerStart {
            nonce: read_u32_le(&body[0..4]),
            server_nonce: read_u32_le(&body[4..8]),
        })
    }

    fn parse_client_challenge_xchg(body: &[u8]) -> Result<Self> {
        let mut offset = 0;

        check_len(body, offset + 4)?;
        let timestamp = read_u32_le(&body[offset..offset + 4]);
        offset += 4;

        check_len(body, offset + CHALLENGE_LEN)?;
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&body[offset..offset + CHALLENGE_LEN]);
        offset += CHALLENGE_LEN;

        check_len(body, offset + 2)?;
        let prime_len = read_u16_le(&body[offset..offset + 2]) as usize;
        offset += 2;

        check_len(body, offset + prime_len)?;
        let prime = body[offset..offset + prime_len].to_vec();
        offset += prime_len;

        check_len(body, offset + 2)?;
        let generator_len = read_u16_le(&body[offset..offset + 2]) as usize;
        offset += 2;

        check_len(body, offset + generator_len)?;
        let generator = body[offset..offset + generator_len].to_vec();
        offset += generator_len;

        check_exact(body, offset)?;
        Ok(Packet::ClientChallengeXchg {
            timestamp,
            challenge,
            prime,
            generator,
        })
    }

    fn parse_server_challenge_xchg(body: &[u8]) -> Result<Self> {
        let mut offset = 0;

        check_len(body, offset + 4)?;
        let timestamp = read_u32_le(&body[offset..offset + 4]);
        offset += 4;

        check_len(body, offset + CHALLENGE_LEN)?;
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&body[offset..offset + CHALLENGE_LEN]);
        offset += CHALLENGE_LEN;

        check_len(body, offset + 2)?;
        let public_key_len = read_u16_le(&body[offset..offset + 2]) as usize;
        offset += 2;

        check_len(body, offset + public_key_len)?;
        let public_key = body[offset..offset + public_key_len].to_vec();
        offset += public_key_len;

        check_exact(body, offset)?;
        Ok(Packet::ServerChallengeXchg {
            timestamp,
            challenge,
            public_key,
        })
    }

    fn parse_client_finished(body: &[u8]) -> Result<Self> {
        let mut offset = 0;

        check_len(body, offset + 2)?;
        let public_key_len = read_u16_le(&body[offset..offset + 2]) as usize;
        offset += 2;

        check_len(body, offset + public_key_len)?;
        let public_key = body[offset..offset + public_key_len].to_vec();
        offset += public_key_len;

        check_len(body, offset + RESULT_LEN)?;
        let mut challenge_result = [0u8; RESULT_LEN];
        challenge_result.copy_from_slice(&body[offset..offset + RESULT_LEN]);
        offset += RESULT_LEN;

        check_exact(body, offset)?;
        Ok(Packet::ClientFinished {
            public_key,
            challenge_result,
        })
    }

    fn parse_server_finished(body: &[u8]) -> Result<Self> {
        check_exact(body, RESULT_LEN)?;
        let mut challenge_result = [0u8; RESULT_LEN];
        challenge_result.copy_from_slice(&body[0..RESULT_LEN]);
        Ok(Packet::ServerFinished { challenge_result })
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Packet::ClientStart { nonce } => {
                buf.extend_from_slice(&nonce.to_le_bytes());
            }
            Packet::ServerStart {
                nonce,
                server_nonce,
            } => {
                buf.extend_from_slice(&nonce.to_le_bytes());
                buf.extend_from_slice(&server_nonce.to_le_bytes());
            }
            Packet::ClientChallengeXchg {
                timestamp,
                challenge,
                prime,
                generator,
            } => {
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.extend_from_slice(challenge);
                buf.extend_from_slice(&(prime.len() as u16).to_le_bytes());
                buf.extend_from_slice(prime);
                buf.extend_from_slice(&(generator.len() as u16).to_le_bytes());
                buf.extend_from_slice(generator);
            }
            Packet::ServerChallengeXchg {
                timestamp,
                challenge,
                public_key,
            } => {
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.extend_from_slice(challenge);
                buf.extend_from_slice(&(public_key.len() as u16).to_le_bytes());
                buf.extend_from_slice(public_key);
            }
            Packet::ClientFinished {
                public_key,
                challenge_result,
            } => {
                buf.extend_from_slice(&(public_key.len() as u16).to_le_bytes());
                buf.extend_from_slice(public_key);
                buf.extend_from_slice(challenge_result);
            }
            Packet::ServerFinished { challenge_result } => {
                buf.extend_from_slice(challenge_result);
            }
            Packet::Encrypted { envelope } => {
                buf.extend_from_slice(envelope);
            }
            Packet::Data { payload } => {
                buf.extend_from_slice(payload);
            }
        }
        buf
    }
}

// === Helper functions ===

#[inline]
fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(Error::InsufficientData(needed))
    } else {
        Ok(())
    }
}

#[inline]
fn check_exact(data: &[u8], expected: usize) -> Result<()> {
    check_len(data, expected)?;
    if data.len() > expected {
        Err(Error::InvalidPacket(format!(
            "{} trailing bytes after body",
            data.len() - expected
        )))
    } else {
        Ok(())
    }
}

#[inline]
fn read_u16_le(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

#[inline]
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}
