//! Handshake transcript accumulation.

use zeroize::Zeroizing;

/// Append-only accumulator of raw handshake message bytes.
///
/// Holds the header-stripped wire bytes of the exchange messages, in
/// send/receive order, as input for the finished-message proofs. The
/// buffer is wiped when cleared or dropped.
#[derive(Default)]
pub struct Transcript {
    buf: Zeroizing<Vec<u8>>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the body bytes of one handshake message.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The accumulated bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Accumulated length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Wipe and discard the accumulated bytes.
    pub fn clear(&mut self) {
        // Dropping the old buffer zeroizes it.
        self.buf = Zeroizing::new(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut transcript = Transcript::new();
        transcript.append(b"first");
        transcript.append(b"second");
        assert_eq!(transcript.bytes(), b"firstsecond");
        assert_eq!(transcript.len(), 11);
    }

    #[test]
    fn test_clear_empties() {
        let mut transcript = Transcript::new();
        transcript.append(&[1, 2, 3]);
        assert!(!transcript.is_empty());
        transcript.clear();
        assert!(transcript.is_empty());
        assert_eq!(transcript.bytes(), b"");
    }
}
