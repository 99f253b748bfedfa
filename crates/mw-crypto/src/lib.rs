//! # mw-crypto: sealed gossip payloads
//!
//! ## Contract
//! - **Cipher**: ChaCha20-Poly1305 keyed with the 256-bit cluster secret.
//! - **Nonce**: 96 random bits drawn per message; never reused deliberately.
//! - **AAD**: the frame header, so version and kind cannot be swapped.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use mw_core::ClusterSecret;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unable to seal payload")]
    Seal,
    /// Wrong key or tampered bytes; the two are indistinguishable.
    #[error("payload failed authentication")]
    Open,
    #[error("nonce source unavailable: {0}")]
    Nonce(String),
}

/// In-place authenticated encryption of gossip payloads.
pub trait PayloadCipher: Send + Sync {
    /// Encrypts `buffer` in place and returns the nonce and tag to ship with it.
    fn seal_in_place(
        &self,
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<([u8; NONCE_LEN], [u8; TAG_LEN]), CryptoError>;

    /// Decrypts `buffer` in place, failing if the tag does not verify.
    fn open_in_place(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<(), CryptoError>;
}

pub struct ClusterCipher {
    cipher: ChaCha20Poly1305,
}

impl ClusterCipher {
    pub fn new(secret: &ClusterSecret) -> Self {
        let key = secret.expose();
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key[..])),
        }
    }
}

impl PayloadCipher for ClusterCipher {
    #[inline]
    fn seal_in_place(
        &self,
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<([u8; NONCE_LEN], [u8; TAG_LEN]), CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::Nonce(e.to_string()))?;

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buffer)
            .map_err(|_| CryptoError::Seal)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok((nonce, tag_bytes))
    }

    #[inline]
    fn open_in_place(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<(), CryptoError> {
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                aad,
                buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::Open)
    }
}
