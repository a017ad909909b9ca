//! Finite-field Diffie-Hellman key agreement.
//!
//! Unlike a fixed-curve exchange, the group parameters here arrive from
//! the peer at handshake time: the peer chooses a modulus and generator,
//! and the session responds with its public value. The wrapper holds the
//! ephemeral private exponent for exactly one handshake and is explicitly
//! destroyable; a destroyed or never-started wrapper refuses every
//! operation.
//!
//! # Security
//!
//! - The private exponent is held as `Zeroizing` bytes and wiped on
//!   `destroy()` or drop.
//! - Degenerate peer public values (`y <= 1` or `y >= p - 1`) are
//!   rejected, mirroring the low-order-point checks a fixed-curve
//!   exchange would perform.
//! - Undersized or even moduli and out-of-range generators are rejected
//!   before any exponent is generated.
//!
//! All byte-level values (modulus, generator, public values, shared
//! secret) are little-endian magnitudes; outputs are padded to the
//! modulus length.

use crate::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Minimum accepted modulus length in bytes.
pub const MIN_MODULUS_LEN: usize = 16;

/// Ephemeral Diffie-Hellman exchange state for one handshake.
///
/// Created idle; `start` arms it with the peer's group, after which
/// `public_value` and `agree` become available until `destroy`.
pub struct DhExchange {
    inner: Option<Active>,
}

struct Active {
    modulus: BigUint,
    modulus_len: usize,
    /// Private exponent, little-endian, wiped on drop.
    private: Zeroizing<Vec<u8>>,
    public: BigUint,
}

impl DhExchange {
    /// Create an idle exchange with no group or key material.
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Whether the exchange currently holds key material.
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Arm the exchange with the peer's `(modulus, generator)` pair,
    /// generating a fresh private exponent and public value.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyExchange` if the modulus is shorter than
    /// [`MIN_MODULUS_LEN`], even, or the generator is outside
    /// `(1, modulus - 1)`.
    pub fn start(&mut self, modulus: &[u8], generator: &[u8]) -> Result<()> {
        if modulus.len() < MIN_MODULUS_LEN {
            return Err(Error::InvalidLength {
                expected: MIN_MODULUS_LEN,
                actual: modulus.len(),
            });
        }

        let p = BigUint::from_bytes_le(modulus);
        if p.bits() < (MIN_MODULUS_LEN as u64) * 8 - 7 {
            return Err(Error::KeyExchange("modulus too small".into()));
        }
        if !p.bit(0) {
            return Err(Error::KeyExchange("modulus is even".into()));
        }

        let g = BigUint::from_bytes_le(generator);
        let one = BigUint::one();
        let p_minus_one = &p - &one;
        if g <= one || g >= p_minus_one {
            return Err(Error::KeyExchange("generator out of range".into()));
        }

        // x in [2, p - 2]
        let two = &one + &one;
        let x = OsRng.gen_biguint_range(&two, &p_minus_one);
        let public = g.modpow(&x, &p);

        self.inner = Some(Active {
            modulus_len: modulus.len(),
            modulus: p,
            private: Zeroizing::new(x.to_bytes_le()),
            public,
        });
        Ok(())
    }

    /// The public value to send to the peer, padded to the modulus length.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyExchange` if the exchange is idle.
    pub fn public_value(&self) -> Result<Vec<u8>> {
        let active = self.active()?;
        Ok(to_padded_le(&active.public, active.modulus_len))
    }

    /// Compute the shared secret from the peer's public value.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyExchange` if the exchange is idle or the peer
    /// value is outside `(1, modulus - 1)`.
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let active = self.active()?;

        let y = BigUint::from_bytes_le(peer_public);
        let one = BigUint::one();
        if y <= one || y >= &active.modulus - &one {
            return Err(Error::KeyExchange("peer public value out of range".into()));
        }

        let x = BigUint::from_bytes_le(&active.private);
        let shared = y.modpow(&x, &active.modulus);
        Ok(Zeroizing::new(to_padded_le(&shared, active.modulus_len)))
    }

    /// Wipe the private exponent and return the wrapper to its idle state.
    pub fn destroy(&mut self) {
        self.inner = None;
    }

    fn active(&self) -> Result<&Active> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::KeyExchange("exchange not started".into()))
    }
}

impl Default for DhExchange {
    fn default() -> Self {
        Self::new()
    }
}

fn to_padded_le(value: &BigUint, len: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    bytes.resize(len, 0);
    bytes
}
