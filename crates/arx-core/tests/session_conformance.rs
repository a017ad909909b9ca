//! Conformance tests driving a session against a simulated client.
//!
//! The harness below plays the client side of the handshake honestly:
//! it runs its own Diffie-Hellman exchange over the group it chooses,
//! accumulates the same transcript, and derives the same key schedule,
//! so every property is checked against an independent computation.

use arx_core::packet::{self, HEADER_LEN};
use arx_core::{AppEndpoint, HandshakeState, Input, Output, Packet, Session};
use arx_crypto::{dh::DhExchange, envelope, kdf};
use zeroize::Zeroizing;

const MASTER_LABEL: &[u8] = b"master secret";
const DEC_LABEL: &[u8] = b"client expansion";
const ENC_LABEL: &[u8] = b"server expansion";
const FIN_SERVER_LABEL: &[u8] = b"server finished";
const FIN_CLIENT_LABEL: &[u8] = b"client finished";

const NULL_U32: [u8; 4] = [0; 4];
const NULL_U16: [u8; 2] = [0; 2];
const ONE: [u8; 1] = [1];

const CIPHER_KEY_LEN: usize = 20;
const MAC_KEY_LEN: usize = 16;

/// 256-bit prime (the secp256k1 field prime), little-endian.
fn prime() -> Vec<u8> {
    let mut be = hex::decode("fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f")
        .unwrap();
    be.reverse();
    be
}

fn single_frame(outputs: Vec<Output>) -> Vec<u8> {
    let [Output::ToTransport(frame)] = &outputs[..] else {
        panic!("expected exactly one transport output, got {:?}", outputs);
    };
    frame.clone()
}

/// Honest client side of the handshake.
struct Client {
    dh: DhExchange,
    transcript: Vec<u8>,
    client_challenge: [u8; 16],
    server_challenge: [u8; 16],
    master: Zeroizing<Vec<u8>>,
    client_result: [u8; packet::RESULT_LEN],
    /// Keys for client-to-server traffic (the session's decrypt keys).
    send_keys: Zeroizing<Vec<u8>>,
    /// Keys for server-to-client traffic (the session's encrypt keys).
    recv_keys: Zeroizing<Vec<u8>>,
    seq: u64,
}

impl Client {
    fn new() -> Self {
        Self {
            dh: DhExchange::new(),
            transcript: Vec::new(),
            client_challenge: [0; 16],
            server_challenge: [0; 16],
            master: Zeroizing::new(Vec::new()),
            client_result: [0; packet::RESULT_LEN],
            send_keys: Zeroizing::new(Vec::new()),
            recv_keys: Zeroizing::new(Vec::new()),
            seq: 0,
        }
    }

    /// Build ClientChallengeXchg and record it in the transcript.
    fn challenge_xchg(&mut self) -> Vec<u8> {
        self.dh.start(&prime(), &[0x05]).unwrap();

        let timestamp: u32 = 1_700_000_000;
        let challenge = [0x24u8; packet::CHALLENGE_LEN];
        self.client_challenge[..4].copy_from_slice(&timestamp.to_le_bytes());
        self.client_challenge[4..].copy_from_slice(&challenge);

        let frame = Packet::ClientChallengeXchg {
            timestamp,
            challenge,
            prime: prime(),
            generator: vec![0x05],
        }
        .encode();
        self.transcript.extend_from_slice(&frame[HEADER_LEN..]);
        frame
    }

    /// Consume ServerChallengeXchg: record it, agree on the shared
    /// secret, and derive the master secret and client proof.
    fn process_server_challenge(&mut self, frame: &[u8]) {
        self.transcript.extend_from_slice(&frame[HEADER_LEN..]);
        let Packet::ServerChallengeXchg {
            timestamp,
            challenge,
            public_key,
        } = Packet::decode(frame).unwrap()
        else {
            panic!("expected ServerChallengeXchg");
        };
        self.server_challenge[..4].copy_from_slice(&timestamp.to_le_bytes());
        self.server_challenge[4..].copy_from_slice(&challenge);

        let shared = self.dh.agree(&public_key).unwrap();
        let master_seed = [
            MASTER_LABEL,
            &self.client_challenge[..],
            &NULL_U32,
            &self.server_challenge[..],
            &NULL_U32,
        ]
        .concat();
        self.master = kdf::expand(&shared, &master_seed, 20).unwrap();

        let client_seed = [FIN_CLIENT_LABEL, &self.transcript[..], &ONE].concat();
        let result = kdf::expand(&self.master, &client_seed, packet::RESULT_LEN).unwrap();
        self.client_result.copy_from_slice(&result);
    }

    /// Build ClientFinished, record it, and derive the traffic keys.
    fn finished(&mut self) -> Vec<u8> {
        let frame = Packet::ClientFinished {
            public_key: self.dh.public_value().unwrap(),
            challenge_result: self.client_result,
        }
        .encode();
        self.transcript.extend_from_slice(&frame[HEADER_LEN..]);

        self.send_keys = self.expand_direction(DEC_LABEL);
        self.recv_keys = self.expand_direction(ENC_LABEL);
        frame
    }

    /// Check the server's proof of possession against the transcript.
    fn verify_server_finished(&self, frame: &[u8]) {
        let Packet::ServerFinished { challenge_result } = Packet::decode(frame).unwrap() else {
            panic!("expected ServerFinished");
        };
        let server_seed = [
            FIN_SERVER_LABEL,
            &self.transcript[..],
            &ONE,
            &self.client_result[..],
            &ONE,
        ]
        .concat();
        let expected = kdf::expand(&self.master, &server_seed, packet::RESULT_LEN).unwrap();
        assert_eq!(&expected[..], &challenge_result);
    }

    fn expand_direction(&self, label: &[u8]) -> Zeroizing<Vec<u8>> {
        let seed = [
            label,
            &NULL_U16,
            &self.server_challenge[..],
            &NULL_U32,
            &self.client_challenge[..],
            &NULL_U32,
        ]
        .concat();
        kdf::expand(&self.master, &seed, 64).unwrap()
    }

    fn send_cipher_key(&self) -> &[u8] {
        &self.send_keys[..CIPHER_KEY_LEN]
    }

    fn send_mac_key(&self) -> &[u8] {
        &self.send_keys[CIPHER_KEY_LEN..CIPHER_KEY_LEN + MAC_KEY_LEN]
    }

    fn recv_cipher_key(&self) -> &[u8] {
        &self.recv_keys[..CIPHER_KEY_LEN]
    }

    fn recv_mac_key(&self) -> &[u8] {
        &self.recv_keys[CIPHER_KEY_LEN..CIPHER_KEY_LEN + MAC_KEY_LEN]
    }

    /// Seal a packet the way an established client peer would.
    fn seal(&mut self, packet: &Packet) -> Vec<u8> {
        let envelope = envelope::seal(
            self.send_cipher_key(),
            self.send_mac_key(),
            self.seq,
            &packet.encode(),
        )
        .unwrap();
        self.seq += 1;
        Packet::Encrypted { envelope }.encode()
    }

    /// Open an encrypted frame the session sent toward the client.
    fn open(&self, frame: &[u8]) -> Packet {
        let Packet::Encrypted { envelope } = Packet::decode(frame).unwrap() else {
            panic!("expected Encrypted frame");
        };
        let (_seq, plaintext) =
            envelope::open(self.recv_cipher_key(), self.recv_mac_key(), &envelope).unwrap();
        Packet::decode(&plaintext).unwrap()
    }
}

/// Run the full five-state handshake, returning the established client.
fn establish(session: &mut Session, nonce: u32) -> Client {
    session.handle(Input::Attach(AppEndpoint(1))).unwrap();

    let outputs = session
        .handle(Input::FromTransport(Packet::ClientStart { nonce }.encode()))
        .unwrap();
    let server_start = single_frame(outputs);
    let Packet::ServerStart {
        nonce: echoed,
        server_nonce: _,
    } = Packet::decode(&server_start).unwrap()
    else {
        panic!("expected ServerStart");
    };
    assert_eq!(echoed, nonce);

    let mut client = Client::new();
    let outputs = session
        .handle(Input::FromTransport(client.challenge_xchg()))
        .unwrap();
    client.process_server_challenge(&single_frame(outputs));

    let outputs = session
        .handle(Input::FromTransport(client.finished()))
        .unwrap();
    client.verify_server_finished(&single_frame(outputs));

    assert!(session.is_established());
    client
}

#[test]
fn test_handshake_yields_mirrored_keys() {
    let mut session = Session::new();
    let client = establish(&mut session, 7);

    let keys = session.keys().expect("established session exposes keys");
    assert_eq!(&keys.decrypt_cipher_key[..], client.send_cipher_key());
    assert_eq!(&keys.decrypt_mac_key[..], client.send_mac_key());
    assert_eq!(&keys.encrypt_cipher_key[..], client.recv_cipher_key());
    assert_eq!(&keys.encrypt_mac_key[..], client.recv_mac_key());
}

#[test]
fn test_nonce_42_end_to_end_round_trip() {
    let mut session = Session::new();
    let mut client = establish(&mut session, 42);

    // Application to transport: the client decrypts what the session sealed.
    let payload = b"mirror mirror".to_vec();
    let outputs = session
        .handle(Input::FromApplication(Packet::Data {
            payload: payload.clone(),
        }))
        .unwrap();
    let sealed = single_frame(outputs);
    assert_eq!(
        client.open(&sealed),
        Packet::Data {
            payload: payload.clone()
        }
    );

    // Transport to application: the session decrypts what the client sealed.
    let frame = client.seal(&Packet::Data {
        payload: payload.clone(),
    });
    let outputs = session.handle(Input::FromTransport(frame)).unwrap();
    assert_eq!(
        outputs,
        vec![Output::ToApplication(
            AppEndpoint(1),
            Packet::Data { payload }
        )]
    );
    assert!(session.is_established());
}

#[test]
fn test_outbound_sequence_advances() {
    let mut session = Session::new();
    establish(&mut session, 1);

    let mut envelopes = Vec::new();
    for _ in 0..2 {
        let outputs = session
            .handle(Input::FromApplication(Packet::Data {
                payload: b"tick".to_vec(),
            }))
            .unwrap();
        let Packet::Encrypted { envelope } = Packet::decode(&single_frame(outputs)).unwrap()
        else {
            panic!("expected Encrypted frame");
        };
        envelopes.push(envelope);
    }
    assert_eq!(&envelopes[0][..8], &0u64.to_le_bytes());
    assert_eq!(&envelopes[1][..8], &1u64.to_le_bytes());
}

#[test]
fn test_tampered_client_finished_rejected() {
    let mut session = Session::new();
    session.handle(Input::Attach(AppEndpoint(1))).unwrap();
    session
        .handle(Input::FromTransport(Packet::ClientStart { nonce: 3 }.encode()))
        .unwrap();

    let mut client = Client::new();
    let outputs = session
        .handle(Input::FromTransport(client.challenge_xchg()))
        .unwrap();
    client.process_server_challenge(&single_frame(outputs));

    // Flip one bit of the honest proof before sending it.
    client.client_result[0] ^= 0x01;
    let outputs = session
        .handle(Input::FromTransport(client.finished()))
        .unwrap();

    assert!(outputs.is_empty());
    assert!(!session.is_established());
    assert_eq!(session.state(), HandshakeState::Initializing);
    assert!(session.keys().is_none());
}

#[test]
fn test_reset_after_establishment_drops_keys() {
    let mut session = Session::new();
    establish(&mut session, 9);
    assert!(session.keys().is_some());

    session.reset();
    assert_eq!(session.state(), HandshakeState::Initializing);
    assert!(session.keys().is_none());

    // A reset session treats traffic as it did when freshly created.
    let frame = Packet::ClientStart { nonce: 9 }.encode();
    assert!(session.handle(Input::FromTransport(frame)).is_err());
}

#[test]
fn test_bit_flipped_mac_rejected() {
    let mut session = Session::new();
    let mut client = establish(&mut session, 5);

    let frame = client.seal(&Packet::Data {
        payload: b"payload".to_vec(),
    });
    // Flip a bit in every position of the MAC region.
    let tag_start = frame.len() - 16;
    for i in tag_start..frame.len() {
        let mut corrupted = frame.clone();
        corrupted[i] ^= 0x01;
        let outputs = session.handle(Input::FromTransport(corrupted)).unwrap();
        assert!(outputs.is_empty(), "corrupted tag byte {} was relayed", i);
        assert!(session.is_established());
    }

    // The untouched frame still goes through afterwards.
    let outputs = session.handle(Input::FromTransport(frame)).unwrap();
    assert_eq!(outputs.len(), 1);
}

#[test]
fn test_unexpected_types_dropped_in_every_state() {
    // NewClient: a Data packet is not a ClientStart.
    let mut session = Session::new();
    session.handle(Input::Attach(AppEndpoint(1))).unwrap();
    let outputs = session
        .handle(Input::FromTransport(
            Packet::Data {
                payload: vec![1, 2],
            }
            .encode(),
        ))
        .unwrap();
    assert!(outputs.is_empty());
    assert_eq!(session.state(), HandshakeState::NewClient);

    // CryptoExchange: a repeated ClientStart is dropped.
    session
        .handle(Input::FromTransport(Packet::ClientStart { nonce: 1 }.encode()))
        .unwrap();
    let outputs = session
        .handle(Input::FromTransport(Packet::ClientStart { nonce: 1 }.encode()))
        .unwrap();
    assert!(outputs.is_empty());
    assert_eq!(session.state(), HandshakeState::CryptoExchange);

    // CryptoSetupFinishing: a repeated challenge exchange is dropped.
    let mut client = Client::new();
    session
        .handle(Input::FromTransport(client.challenge_xchg()))
        .unwrap();
    let outputs = session
        .handle(Input::FromTransport(
            Packet::ClientStart { nonce: 1 }.encode(),
        ))
        .unwrap();
    assert!(outputs.is_empty());
    assert_eq!(session.state(), HandshakeState::CryptoSetupFinishing);

    // Established: late handshake packets are protocol violations.
    let mut session = Session::new();
    establish(&mut session, 2);
    for frame in [
        Packet::ClientStart { nonce: 8 }.encode(),
        Packet::ClientFinished {
            public_key: vec![2; 32],
            challenge_result: [0; packet::RESULT_LEN],
        }
        .encode(),
    ] {
        let outputs = session.handle(Input::FromTransport(frame)).unwrap();
        assert!(outputs.is_empty());
        assert!(session.is_established());
    }
}
