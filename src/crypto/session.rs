//! ChaCha20-Poly1305 session envelope.
//!
//! Encrypted packets carry `[IV (12) | tag (16) | ciphertext]` ahead of the
//! plaintext trailer; the trailer bytes are authenticated as associated
//! data. Key agreement happens outside the transport - a finished handshake
//! injects its key through [`Peer::set_session_key`](crate::transport::Peer::set_session_key).

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce, Tag};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::core::constants::{AEAD_IV_SIZE, AEAD_TAG_SIZE};
use crate::core::CryptoError;

/// Size of a session key.
pub const SESSION_KEY_SIZE: usize = 32;

/// A session key for AEAD operations.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a session key from bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Per-peer AEAD state built from an injected session key.
pub struct SessionCrypto {
    cipher: ChaCha20Poly1305,
}

impl SessionCrypto {
    /// Build the cipher state for a session key.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Draw a fresh random IV.
    pub fn generate_iv() -> [u8; AEAD_IV_SIZE] {
        let mut iv = [0u8; AEAD_IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        iv
    }

    /// Encrypt `data` in place under `iv`, authenticating `aad`, returning
    /// the detached tag.
    pub fn seal_detached(
        &self,
        iv: &[u8; AEAD_IV_SIZE],
        aad: &[u8],
        data: &mut [u8],
    ) -> Result<[u8; AEAD_TAG_SIZE], CryptoError> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(iv), aad, data)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(tag.into())
    }

    /// Decrypt `data` in place, verifying `tag` over the data and `aad`.
    ///
    /// Fails closed: after a tag mismatch the buffer contents are
    /// unspecified and must be discarded.
    pub fn open_detached(
        &self,
        iv: &[u8; AEAD_IV_SIZE],
        tag: &[u8; AEAD_TAG_SIZE],
        aad: &[u8],
        data: &mut [u8],
    ) -> Result<(), CryptoError> {
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(iv), aad, data, Tag::from_slice(tag))
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
