//! Authenticated envelope sealing and opening.
//!
//! Established sessions move application packets inside envelopes:
//!
//! ```text
//! sequence (8 bytes, LE) || ciphertext || tag (16 bytes)
//! ```
//!
//! The ciphertext is the plaintext XORed with a keystream expanded from
//! the cipher key and the sequence number via [`crate::kdf`], so the
//! 20-byte cipher keys produced by the handshake are used as-is. The tag
//! is a truncated HMAC-SHA256 over the sequence number and ciphertext
//! under the 16-byte MAC key, verified in constant time before any
//! decryption happens.
//!
//! The sequence number doubles as the keystream nonce: a given
//! `(cipher_key, seq)` pair must never seal two different plaintexts.

use crate::{kdf, Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Sequence number width in bytes.
pub const SEQ_LEN: usize = 8;
/// Authentication tag width in bytes.
pub const TAG_LEN: usize = 16;

const KEYSTREAM_LABEL: &[u8] = b"arx keystream";

/// Seal a plaintext into an authenticated envelope.
pub fn seal(cipher_key: &[u8], mac_key: &[u8], seq: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut envelope = Vec::with_capacity(SEQ_LEN + plaintext.len() + TAG_LEN);
    envelope.extend_from_slice(&seq.to_le_bytes());

    let keystream = keystream(cipher_key, seq, plaintext.len())?;
    envelope.extend(plaintext.iter().zip(keystream.iter()).map(|(p, k)| p ^ k));

    let tag = compute_tag(mac_key, seq, &envelope[SEQ_LEN..])?;
    envelope.extend_from_slice(&tag);
    Ok(envelope)
}

/// Open an envelope, verifying its tag before decrypting.
///
/// Returns the envelope's sequence number alongside the plaintext.
///
/// # Errors
///
/// - `Error::InvalidLength` if the envelope is shorter than the fixed
///   framing.
/// - `Error::Authentication` if the tag does not verify.
pub fn open(
    cipher_key: &[u8],
    mac_key: &[u8],
    envelope: &[u8],
) -> Result<(u64, Zeroizing<Vec<u8>>)> {
    if envelope.len() < SEQ_LEN + TAG_LEN {
        return Err(Error::InvalidLength {
            expected: SEQ_LEN + TAG_LEN,
            actual: envelope.len(),
        });
    }

    let seq = u64::from_le_bytes(envelope[..SEQ_LEN].try_into().unwrap());
    let ciphertext = &envelope[SEQ_LEN..envelope.len() - TAG_LEN];
    let tag = &envelope[envelope.len() - TAG_LEN..];

    let expected = compute_tag(mac_key, seq, ciphertext)?;
    if !bool::from(expected[..].ct_eq(tag)) {
        return Err(Error::Authentication("envelope tag mismatch".into()));
    }

    let keystream = keystream(cipher_key, seq, ciphertext.len())?;
    let plaintext = Zeroizing::new(
        ciphertext
            .iter()
            .zip(keystream.iter())
            .map(|(c, k)| c ^ k)
            .collect(),
    );
    Ok((seq, plaintext))
}

fn keystream(cipher_key: &[u8], seq: u64, len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut seed = Vec::with_capacity(KEYSTREAM_LABEL.len() + SEQ_LEN);
    seed.extend_from_slice(KEYSTREAM_LABEL);
    seed.extend_from_slice(&seq.to_le_bytes());
    kdf::expand(cipher_key, &seed, len)
}

fn compute_tag(mac_key: &[u8], seq: u64, ciphertext: &[u8]) -> Result<[u8; TAG_LEN]> {
    let mut mac = Hmac::<Sha256>::new_from_slice(mac_key)
        .map_err(|_| Error::Authentication("MAC key setup failed".into()))?;
    mac.update(&seq.to_le_bytes());
    mac.update(ciphertext);
    let full = mac.finalize().into_bytes();

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&full[..TAG_LEN]);
    Ok(tag)
}
