//! Session management: handshake state machine and encrypted relay.
//!
//! One `Session` exists per logical connection, owned exclusively by the
//! worker processing that connection. It consumes inputs from the
//! transport side and the application side through a single entry point,
//! [`Session::handle`], and returns the outputs to deliver. While
//! handshaking it consumes and emits handshake packets; once established
//! it becomes a two-way encrypting/decrypting pipe.
//!
//! Recoverable failures (malformed packets, wrong-state packets, envelope
//! authentication failures) are logged and dropped without changing
//! state. An `Err` from `handle` is fatal: the caller must terminate the
//! session.

use crate::packet::{self, Packet, PacketType, HEADER_LEN};
use crate::transcript::Transcript;
use crate::{Error, Result};
use arx_crypto::{dh::DhExchange, envelope, kdf};
use rand::{rngs::OsRng, RngCore};
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Cipher key length in bytes, per traffic direction.
pub const CIPHER_KEY_LEN: usize = 20;
/// MAC key length in bytes, per traffic direction.
pub const MAC_KEY_LEN: usize = 16;
/// Full challenge value length: timestamp (4 bytes) plus random bytes.
pub const CHALLENGE_VALUE_LEN: usize = 4 + packet::CHALLENGE_LEN;

const MASTER_LABEL: &[u8] = b"master secret";
const DEC_LABEL: &[u8] = b"client expansion";
const ENC_LABEL: &[u8] = b"server expansion";
const FIN_SERVER_LABEL: &[u8] = b"server finished";
const FIN_CLIENT_LABEL: &[u8] = b"client finished";

const MASTER_LEN: usize = 20;
const EXPANSION_LEN: usize = 64;

// Seed separators, matching the peer's derivation byte for byte.
const NULL_U32: [u8; 4] = [0; 4];
const NULL_U16: [u8; 2] = [0; 2];
const ONE: [u8; 1] = [1];

/// Opaque handle identifying the application-side peer of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppEndpoint(pub u64);

/// Inputs a session consumes.
#[derive(Debug)]
pub enum Input {
    /// Session bootstrap: attaches the application-side peer handle.
    /// Delivered once, before any traffic.
    Attach(AppEndpoint),
    /// A raw frame arriving from the transport side.
    FromTransport(Vec<u8>),
    /// A plaintext packet arriving from the application side, to be
    /// encrypted and sent outward.
    FromApplication(Packet),
}

/// Outputs a session produces.
#[derive(Debug, PartialEq, Eq)]
pub enum Output {
    /// A raw frame to hand to the transport side.
    ToTransport(Vec<u8>),
    /// A plaintext packet to deliver to the application side.
    ToApplication(AppEndpoint, Packet),
}

/// Handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Created, awaiting the application-side handle.
    Initializing,
    /// Awaiting ClientStart.
    NewClient,
    /// Awaiting ClientChallengeXchg.
    CryptoExchange,
    /// Awaiting ClientFinished.
    CryptoSetupFinishing,
    /// Handshake complete; relaying encrypted traffic.
    Established,
}

/// Direction-specific keys produced by a successful handshake.
///
/// Owned exclusively by the session; wiped on reset or drop.
pub struct CryptoState {
    /// Cipher key for inbound (client-to-server) traffic.
    pub decrypt_cipher_key: Zeroizing<[u8; CIPHER_KEY_LEN]>,
    /// Cipher key for outbound (server-to-client) traffic.
    pub encrypt_cipher_key: Zeroizing<[u8; CIPHER_KEY_LEN]>,
    /// MAC key for inbound traffic.
    pub decrypt_mac_key: Zeroizing<[u8; MAC_KEY_LEN]>,
    /// MAC key for outbound traffic.
    pub encrypt_mac_key: Zeroizing<[u8; MAC_KEY_LEN]>,
}

/// Per-connection session state machine.
pub struct Session {
    state: HandshakeState,
    app: Option<AppEndpoint>,
    dh: DhExchange,
    crypto: Option<CryptoState>,
    client_challenge: Option<Zeroizing<[u8; CHALLENGE_VALUE_LEN]>>,
    server_challenge: Option<Zeroizing<[u8; CHALLENGE_VALUE_LEN]>>,
    transcript: Transcript,
    /// Outbound envelope sequence number, advanced per sealed frame.
    seq: u64,
}

impl Session {
    /// Create a session in the Initializing state.
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Initializing,
            app: None,
            dh: DhExchange::new(),
            crypto: None,
            client_challenge: None,
            server_challenge: None,
            transcript: Transcript::new(),
            seq: 0,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// Derived keys, present only once established.
    pub fn keys(&self) -> Option<&CryptoState> {
        self.crypto.as_ref()
    }

    /// Process one input, returning the outputs to deliver.
    ///
    /// # Errors
    ///
    /// An error is fatal to the session: transport traffic before the
    /// bootstrap signal, or an internal invariant failure. The caller
    /// must terminate the session; no partial outputs are emitted.
    pub fn handle(&mut self, input: Input) -> Result<Vec<Output>> {
        match input {
            Input::Attach(endpoint) => self.on_attach(endpoint),
            Input::FromTransport(bytes) => match self.state {
                HandshakeState::Initializing => Err(Error::ProtocolViolation(
                    "transport traffic before session attach".into(),
                )),
                HandshakeState::NewClient => self.on_client_start(&bytes),
                HandshakeState::CryptoExchange => self.on_client_challenge_xchg(&bytes),
                HandshakeState::CryptoSetupFinishing => self.on_client_finished(&bytes),
                HandshakeState::Established => self.relay_inbound(&bytes),
            },
            Input::FromApplication(packet) => self.relay_outbound(packet),
        }
    }

    /// Return the session to Initializing, wiping all handshake and key
    /// material. Safe to call in any state.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Initializing;
        self.app = None;
        // A stale exchange must never survive into the next handshake.
        self.dh = DhExchange::new();
        self.crypto = None;
        self.client_challenge = None;
        self.server_challenge = None;
        self.transcript.clear();
        self.seq = 0;
    }

    fn on_attach(&mut self, endpoint: AppEndpoint) -> Result<Vec<Output>> {
        if self.state != HandshakeState::Initializing {
            warn!(state = ?self.state, "dropping duplicate attach signal");
            return Ok(Vec::new());
        }
        self.app = Some(endpoint);
        self.state = HandshakeState::NewClient;
        debug!(?endpoint, "session attached");
        Ok(Vec::new())
    }

    fn on_client_start(&mut self, bytes: &[u8]) -> Result<Vec<Output>> {
        let packet = match Packet::decode_expected(bytes, PacketType::ClientStart) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(state = ?self.state, error = %e, "dropping packet");
                return Ok(Vec::new());
            }
        };
        let Packet::ClientStart { nonce } = packet else {
            return Ok(Vec::new());
        };

        let reply = Packet::ServerStart {
            nonce,
            server_nonce: OsRng.next_u32(),
        };
        self.state = HandshakeState::CryptoExchange;
        debug!(nonce, "handshake started");
        Ok(vec![Output::ToTransport(reply.encode())])
    }

    fn on_client_challenge_xchg(&mut self, bytes: &[u8]) -> Result<Vec<Output>> {
        let packet = match Packet::decode_expected(bytes, PacketType::ClientChallengeXchg) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(state = ?self.state, error = %e, "dropping packet");
                return Ok(Vec::new());
            }
        };
        let Packet::ClientChallengeXchg {
            timestamp,
            challenge,
            prime,
            generator,
        } = packet
        else {
            return Ok(Vec::new());
        };

        if let Err(e) = self.dh.start(&prime, &generator) {
            warn!(error = %e, "dropping challenge with unusable key exchange group");
            return Ok(Vec::new());
        }

        self.client_challenge = Some(challenge_value(timestamp, &challenge));
        self.transcript.append(&bytes[HEADER_LEN..]);

        let server_timestamp = unix_time();
        let mut server_random = [0u8; packet::CHALLENGE_LEN];
        OsRng.fill_bytes(&mut server_random);
        self.server_challenge = Some(challenge_value(server_timestamp, &server_random));

        let reply = Packet::ServerChallengeXchg {
            timestamp: server_timestamp,
            challenge: server_random,
            public_key: self.dh.public_value()?,
        };
        let frame = reply.encode();
        self.transcript.append(&frame[HEADER_LEN..]);

        self.state = HandshakeState::CryptoSetupFinishing;
        debug!("challenge exchange complete");
        Ok(vec![Output::ToTransport(frame)])
    }

    fn on_client_finished(&mut self, bytes: &[u8]) -> Result<Vec<Output>> {
        let packet = match Packet::decode_expected(bytes, PacketType::ClientFinished) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(state = ?self.state, error = %e, "dropping packet");
                return Ok(Vec::new());
            }
        };
        let Packet::ClientFinished {
            public_key,
            challenge_result,
        } = packet
        else {
            return Ok(Vec::new());
        };

        let shared = match self.dh.agree(&public_key) {
            Ok(shared) => shared,
            Err(e) => {
                warn!(error = %e, "aborting handshake: key agreement failed");
                self.reset();
                return Ok(Vec::new());
            }
        };

        let client_challenge = self
            .client_challenge
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("missing client challenge".into()))?;
        let server_challenge = self
            .server_challenge
            .as_ref()
            .ok_or_else(|| Error::ProtocolViolation("missing server challenge".into()))?;

        let master_seed = build_seed(&[
            MASTER_LABEL,
            &client_challenge[..],
            &NULL_U32,
            &server_challenge[..],
            &NULL_U32,
        ]);
        let master = kdf::expand(&shared, &master_seed, MASTER_LEN)?;

        // The client's proof covers the transcript through
        // ServerChallengeXchg; verify before admitting its bytes.
        let client_seed = build_seed(&[FIN_CLIENT_LABEL, self.transcript.bytes(), &ONE]);
        let expected = kdf::expand(&master, &client_seed, packet::RESULT_LEN)?;
        if !bool::from(expected[..].ct_eq(&challenge_result)) {
            warn!("aborting handshake: client challenge result mismatch");
            self.reset();
            return Ok(Vec::new());
        }

        self.transcript.append(&bytes[HEADER_LEN..]);

        let server_seed = build_seed(&[
            FIN_SERVER_LABEL,
            self.transcript.bytes(),
            &ONE,
            &expected[..],
            &ONE,
        ]);
        let server_result = kdf::expand(&master, &server_seed, packet::RESULT_LEN)?;

        self.crypto = Some(derive_crypto_state(
            &master,
            client_challenge,
            server_challenge,
        )?);

        let mut challenge_result = [0u8; packet::RESULT_LEN];
        challenge_result.copy_from_slice(&server_result);
        let reply = Packet::ServerFinished { challenge_result };

        self.dh.destroy();
        self.transcript.clear();
        self.state = HandshakeState::Established;
        debug!("session established");
        Ok(vec![Output::ToTransport(reply.encode())])
    }

    fn relay_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Output>> {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return Ok(Vec::new());
            }
        };

        match packet {
            Packet::Encrypted { envelope } => {
                let crypto = self.crypto.as_ref().ok_or_else(|| {
                    Error::ProtocolViolation("established session missing key state".into())
                })?;
                let (_seq, plaintext) = match envelope::open(
                    &crypto.decrypt_cipher_key[..],
                    &crypto.decrypt_mac_key[..],
                    &envelope,
                ) {
                    Ok(opened) => opened,
                    Err(e) => {
                        warn!(error = %e, "dropping envelope that failed authentication");
                        return Ok(Vec::new());
                    }
                };
                let inner = match Packet::decode(&plaintext) {
                    Ok(inner) => inner,
                    Err(e) => {
                        warn!(error = %e, "dropping envelope with undecodable plaintext");
                        return Ok(Vec::new());
                    }
                };
                // Decrypted packets re-enter as fresh plaintext events for
                // the relay step only, never the handshake states.
                self.deliver(inner)
            }
            packet if packet.packet_type().is_handshake() => {
                warn!(packet_type = ?packet.packet_type(), "dropping handshake packet on established session");
                Ok(Vec::new())
            }
            packet => self.deliver(packet),
        }
    }

    fn deliver(&self, packet: Packet) -> Result<Vec<Output>> {
        if packet.packet_type().is_handshake() {
            warn!(packet_type = ?packet.packet_type(), "dropping handshake packet on established session");
            return Ok(Vec::new());
        }
        let endpoint = self
            .app
            .ok_or_else(|| Error::ProtocolViolation("established session missing endpoint".into()))?;
        Ok(vec![Output::ToApplication(endpoint, packet)])
    }

    fn relay_outbound(&mut self, packet: Packet) -> Result<Vec<Output>> {
        if self.state != HandshakeState::Established {
            warn!(state = ?self.state, "dropping application packet before establishment");
            return Ok(Vec::new());
        }
        let crypto = self.crypto.as_ref().ok_or_else(|| {
            Error::ProtocolViolation("established session missing key state".into())
        })?;

        let plaintext = Zeroizing::new(packet.encode());
        let envelope = envelope::seal(
            &crypto.encrypt_cipher_key[..],
            &crypto.encrypt_mac_key[..],
            self.seq,
            &plaintext,
        )?;
        self.seq += 1;

        let frame = Packet::Encrypted { envelope }.encode();
        Ok(vec![Output::ToTransport(frame)])
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn challenge_value(
    timestamp: u32,
    random: &[u8; packet::CHALLENGE_LEN],
) -> Zeroizing<[u8; CHALLENGE_VALUE_LEN]> {
    let mut value = Zeroizing::new([0u8; CHALLENGE_VALUE_LEN]);
    value[..4].copy_from_slice(&timestamp.to_le_bytes());
    value[4..].copy_from_slice(random);
    value
}

fn build_seed(parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let mut seed = Zeroizing::new(Vec::new());
    for part in parts {
        seed.extend_from_slice(part);
    }
    seed
}

fn derive_crypto_state(
    master: &[u8],
    client_challenge: &[u8; CHALLENGE_VALUE_LEN],
    server_challenge: &[u8; CHALLENGE_VALUE_LEN],
) -> Result<CryptoState> {
    let dec_seed = build_seed(&[
        DEC_LABEL,
        &NULL_U16,
        &server_challenge[..],
        &NULL_U32,
        &client_challenge[..],
        &NULL_U32,
    ]);
    let enc_seed = build_seed(&[
        ENC_LABEL,
        &NULL_U16,
        &server_challenge[..],
        &NULL_U32,
        &client_challenge[..],
        &NULL_U32,
    ]);

    let expanded_dec = kdf::expand(master, &dec_seed, EXPANSION_LEN)?;
    let expanded_enc = kdf::expand(master, &enc_seed, EXPANSION_LEN)?;

    let mut decrypt_cipher_key = Zeroizing::new([0u8; CIPHER_KEY_LEN]);
    let mut encrypt_cipher_key = Zeroizing::new([0u8; CIPHER_KEY_LEN]);
    let mut decrypt_mac_key = Zeroizing::new([0u8; MAC_KEY_LEN]);
    let mut encrypt_mac_key = Zeroizing::new([0u8; MAC_KEY_LEN]);
    decrypt_cipher_key.copy_from_slice(&expanded_dec[..CIPHER_KEY_LEN]);
    decrypt_mac_key.copy_from_slice(&expanded_dec[CIPHER_KEY_LEN..CIPHER_KEY_LEN + MAC_KEY_LEN]);
    encrypt_cipher_key.copy_from_slice(&expanded_enc[..CIPHER_KEY_LEN]);
    encrypt_mac_key.copy_from_slice(&expanded_enc[CIPHER_KEY_LEN..CIPHER_KEY_LEN + MAC_KEY_LEN]);

    Ok(CryptoState {
        decrypt_cipher_key,
        encrypt_cipher_key,
        decrypt_mac_key,
        encrypt_mac_key,
    })
}
