use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::SecretError;

/// Key length in bytes (256 bits).
pub const SECRET_LEN: usize = 32;

/// The pre-shared symmetric key protecting all gossip traffic.
///
/// Immutable once created. The key material is wiped on drop and never
/// printed by `Debug`; use [`ClusterSecret::encode`] to hand it to an operator.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterSecret {
    key: Zeroizing<[u8; SECRET_LEN]>,
}

impl ClusterSecret {
    /// Draws a fresh key from the operating system's CSPRNG.
    ///
    /// There is no fallback source: if the OS cannot provide secure bytes
    /// the call fails with [`SecretError::Entropy`].
    pub fn generate() -> Result<Self, SecretError> {
        let mut key = Zeroizing::new([0u8; SECRET_LEN]);
        OsRng
            .try_fill_bytes(&mut key[..])
            .map_err(|e| SecretError::Entropy(e.to_string()))?;
        Ok(Self { key })
    }

    /// Parses the standard base64 form printed by [`ClusterSecret::encode`].
    pub fn decode(text: &str) -> Result<Self, SecretError> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(text.trim())
                .map_err(|e| SecretError::Malformed(e.to_string()))?,
        );
        if raw.len() != SECRET_LEN {
            return Err(SecretError::Malformed(format!(
                "expected {} bytes, got {}",
                SECRET_LEN,
                raw.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; SECRET_LEN]);
        key.copy_from_slice(&raw);
        Ok(Self { key })
    }

    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self {
            key: Zeroizing::new(bytes),
        }
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(&self.key[..])
    }

    pub fn expose(&self) -> &Zeroizing<[u8; SECRET_LEN]> {
        &self.key
    }
}

impl fmt::Debug for ClusterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClusterSecret(<redacted>)")
    }
}
