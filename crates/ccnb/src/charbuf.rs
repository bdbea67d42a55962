//! Growable byte buffer that wire encodings accumulate into.

use crate::coding::{self, Tt, CLOSE};

/// An owned, growable byte sequence.
///
/// All encoders in this workspace append into one of these. The buffer keeps
/// its capacity across [`reset`](CharBuf::reset) so that per-message scratch
/// buffers do not reallocate.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CharBuf {
    bytes: Vec<u8>,
}

impl CharBuf {
    pub fn new() -> CharBuf {
        CharBuf { bytes: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> CharBuf {
        CharBuf {
            bytes: Vec::with_capacity(n),
        }
    }

    pub fn from_slice(data: &[u8]) -> CharBuf {
        CharBuf {
            bytes: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop the contents but keep the capacity.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Make sure at least `n` more bytes can be appended without growing.
    pub fn reserve(&mut self, n: usize) {
        self.bytes.reserve(n);
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn append_charbuf(&mut self, other: &CharBuf) {
        self.bytes.extend_from_slice(other.as_slice());
    }

    pub fn append_byte(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn append_string(&mut self, s: &str) {
        self.bytes.extend_from_slice(s.as_bytes());
    }

    /// Append `val` as a fixed-width big-endian integer of `n` bytes.
    pub fn append_value(&mut self, val: u64, n: usize) {
        debug_assert!(n <= 8);
        for i in (0..n).rev() {
            self.bytes.push((val >> (8 * i)) as u8);
        }
    }

    /// Append one ccnb token header.
    pub fn append_tt(&mut self, val: u64, tt: Tt) {
        coding::append_tt(&mut self.bytes, val, tt);
    }

    /// Append an element closer.
    pub fn append_closer(&mut self) {
        self.bytes.push(CLOSE);
    }

    /// Truncate to `len` bytes; `len` must not exceed the current length.
    pub fn truncate(&mut self, len: usize) {
        assert!(len <= self.bytes.len());
        self.bytes.truncate(len);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl AsRef<[u8]> for CharBuf {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for CharBuf {
    fn from(bytes: Vec<u8>) -> CharBuf {
        CharBuf { bytes }
    }
}
