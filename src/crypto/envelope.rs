//! Envelope encryption of per-object content keys.
//!
//! The server-held master key never touches file content. It only wraps the
//! fresh content key generated for each stored version, which limits the
//! blast radius of a leaked envelope to that single version.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use super::cipher::{ContentKey, KEY_SIZE, NONCE_SIZE};
use crate::{ObsiLockError, Result};

/// A wrapped content key and the nonce it was wrapped under.
#[derive(Debug, Clone)]
pub struct KeyEnvelope {
    /// Ciphertext of the content key (key + tag).
    pub envelope: Vec<u8>,
    /// Nonce used to wrap the key.
    pub nonce: [u8; NONCE_SIZE],
}

/// The process-lifetime master key.
///
/// Loaded once at startup from a base64-encoded secret; constructed explicitly
/// and passed down, never held in a global. Key bytes are zeroed on drop.
pub struct MasterKey(Zeroizing<[u8; KEY_SIZE]>);

impl MasterKey {
    /// Decode the master key from its base64 representation.
    ///
    /// Fails with a configuration error if the value is not valid base64 or
    /// does not decode to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|e| {
            ObsiLockError::Config(format!("master key is not valid base64: {e}"))
        })?);

        if decoded.len() != KEY_SIZE {
            return Err(ObsiLockError::Config(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                decoded.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&decoded);
        Ok(Self(Zeroizing::new(key)))
    }

    /// Generate a fresh base64-encoded master key for operator setup.
    pub fn generate_base64() -> String {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut key[..]);
        BASE64.encode(&key[..])
    }

    /// Wrap a content key under the master key with a fresh nonce.
    pub fn wrap(&self, content_key: &ContentKey) -> Result<KeyEnvelope> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.0[..]));
        let envelope = cipher
            .encrypt(XNonce::from_slice(&nonce), &content_key.as_bytes()[..])
            .map_err(|_| ObsiLockError::KeyUnwrap("content key wrap failed".to_string()))?;

        Ok(KeyEnvelope { envelope, nonce })
    }

    /// Unwrap a content key.
    ///
    /// Fails with `KeyUnwrap` on a wrong master key, a tampered envelope, or
    /// malformed stored material.
    pub fn unwrap_key(&self, envelope: &[u8], nonce: &[u8]) -> Result<ContentKey> {
        if nonce.len() != NONCE_SIZE {
            return Err(ObsiLockError::KeyUnwrap(format!(
                "envelope nonce must be {NONCE_SIZE} bytes, got {}",
                nonce.len()
            )));
        }

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.0[..]));
        let decrypted = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(nonce), envelope)
                .map_err(|_| {
                    ObsiLockError::KeyUnwrap("content key authentication failed".to_string())
                })?,
        );

        if decrypted.len() != KEY_SIZE {
            return Err(ObsiLockError::KeyUnwrap(format!(
                "unwrapped key must be {KEY_SIZE} bytes, got {}",
                decrypted.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&decrypted);
        Ok(ContentKey::from_bytes(key))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}
