//! SHA3-256 checksum type used to guard serialized artifacts.

use crate::types::encoding::{Encode, EncodeSink};
use cellvm_derive::BinaryCodec;
use sha3::{Digest, Sha3_256};
use std::fmt;

/// SHA3-256 digest length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte SHA3-256 digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Starts an incremental SHA3-256 computation.
    pub fn sha3() -> HashBuilder {
        HashBuilder::new()
    }

    /// Hashes raw bytes in one call.
    pub fn digest(data: &[u8]) -> Hash {
        let mut builder = Hash::sha3();
        builder.update(data);
        builder.finalize()
    }

    /// Hashes the encoded form of `value` without buffering it.
    pub fn of<T: Encode + ?Sized>(value: &T) -> Hash {
        let mut builder = Hash::sha3();
        value.encode(&mut builder);
        builder.finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental SHA3-256 builder.
///
/// Implements [`EncodeSink`] so encodable values stream straight into it.
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha3_256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_matches_buffered() {
        let value: Vec<u32> = vec![1, 2, 3];
        let mut h = Hash::sha3();
        h.update(&value.to_bytes());
        assert_eq!(Hash::of(&value), h.finalize());
    }

    #[test]
    fn display_is_lowercase_hex() {
        let text = Hash::zero().to_string();
        assert_eq!(text.len(), HASH_LEN * 2);
        assert!(text.chars().all(|c| c == '0'));
    }

    #[test]
    fn digest_matches_builder() {
        let mut h = Hash::sha3();
        h.update(b"cell");
        assert_eq!(Hash::digest(b"cell"), h.finalize());
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(Hash::of("a"), Hash::of("b"));
    }
}
