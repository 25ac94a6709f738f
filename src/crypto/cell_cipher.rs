//! Reversible transforms applied to memory cell payloads at rest.
//!
//! Sealed cell format: `[24B nonce][ciphertext+16B tag]`, with the cell
//! address (little-endian `u64`) bound in as associated data so a payload
//! copied to another address fails to open.

use cellvm_derive::Error;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand_core::{OsRng, RngCore};
use std::fmt;
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("sealing failed")]
    Seal,
    #[error("payload could not be opened")]
    Open,
}

/// Transform between encoded cell values and their stored form.
///
/// `open(address, seal(address, bytes)) == bytes` must hold for every codec.
pub trait CellCodec: Send {
    fn seal(&self, address: u64, plain: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn open(&self, address: u64, sealed: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Stores payloads unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl CellCodec for PlainCodec {
    fn seal(&self, _address: u64, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(plain.to_vec())
    }

    fn open(&self, _address: u64, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(sealed.to_vec())
    }
}

/// XChaCha20-Poly1305 codec under a per-store random key.
///
/// The key is drawn from OS entropy at construction, zeroized on drop, and
/// never leaves this type.
pub struct CellCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CellCipher {
    /// Generates a fresh random key using OS-provided entropy.
    pub fn new() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        Self { key }
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(self.key.as_ref().into())
    }
}

impl Default for CellCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CellCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CellCipher { .. }")
    }
}

impl CellCodec for CellCipher {
    fn seal(&self, address: u64, plain: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let aad = address.to_le_bytes();
        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plain,
                    aad: &aad,
                },
            )
            .map_err(|_| CodecError::Seal)?;

        let mut data = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&ciphertext);
        Ok(data)
    }

    fn open(&self, address: u64, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CodecError::Open);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let aad = address.to_le_bytes();
        self.cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CodecError::Open)
    }
}
