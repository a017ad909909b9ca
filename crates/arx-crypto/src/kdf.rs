//! Keyed pseudorandom key expansion.
//!
//! The handshake derives all of its key material through a single chained
//! HMAC-SHA256 construction: an intermediate chaining value is iterated
//! under the secret, each iteration also producing one 32-byte output
//! block, and the concatenated blocks are truncated to the requested
//! length. The output is a prefix-stable stream: `expand(s, seed, n)` is
//! the first `n` bytes of `expand(s, seed, m)` for any `m >= n`.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Output block size of the underlying MAC in bytes.
pub const BLOCK_LEN: usize = 32;

/// Expand a `(secret, seed)` pair into `out_len` pseudorandom bytes.
///
/// Deterministic: the same inputs always yield the same bytes. The secret
/// and seed may be of any length.
///
/// # Example
/// ```
/// use arx_crypto::kdf;
///
/// let a = kdf::expand(b"secret", b"seed", 20).unwrap();
/// let b = kdf::expand(b"secret", b"seed", 64).unwrap();
/// assert_eq!(&a[..], &b[..20]);
/// ```
pub fn expand(secret: &[u8], seed: &[u8], out_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::with_capacity(out_len + BLOCK_LEN));

    // chain(1) = HMAC(secret, seed)
    // block(i) = HMAC(secret, chain(i) || seed)
    // chain(i+1) = HMAC(secret, chain(i))
    let mut chain = Zeroizing::new(mac_block(secret, &[seed])?);
    while out.len() < out_len {
        let block = Zeroizing::new(mac_block(secret, &[&chain[..], seed])?);
        out.extend_from_slice(&block[..]);
        *chain = mac_block(secret, &[&chain[..]])?;
    }

    out.truncate(out_len);
    Ok(out)
}

fn mac_block(secret: &[u8], parts: &[&[u8]]) -> Result<[u8; BLOCK_LEN]> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| Error::KeyDerivation("HMAC key setup failed".into()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}
