//! Keyed signing of share bearer tokens.
//!
//! Share tokens carry an HMAC-SHA256 signature computed with a signing secret
//! distinct from the encryption master key. The signature is verifiable
//! without any extra lookups and is compared in constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{ObsiLockError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a bearer token.
pub const TOKEN_BYTES: usize = 32;

/// Minimum signing secret length in bytes.
const MIN_SECRET_LEN: usize = 32;

/// Signs and verifies share bearer tokens.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    /// Create a signer from the configured secret.
    ///
    /// Fails with a configuration error if the secret is shorter than
    /// 32 bytes.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(ObsiLockError::Config(format!(
                "HMAC signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| ObsiLockError::Config("invalid HMAC signing secret".to_string()))?;
        Ok(Self { mac })
    }

    /// Generate a fresh high-entropy bearer token (URL-safe base64, ~43 chars).
    pub fn generate_token() -> String {
        let mut bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
        OsRng.fill_bytes(&mut bytes[..]);
        URL_SAFE_NO_PAD.encode(&bytes[..])
    }

    /// Compute the hex-encoded signature for a token.
    pub fn sign(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a token against its stored hex signature in constant time.
    ///
    /// Fails with `Tamper` on any mismatch, including malformed signatures.
    pub fn verify(&self, token: &str, signature_hex: &str) -> Result<()> {
        let signature = hex::decode(signature_hex).map_err(|_| ObsiLockError::Tamper)?;

        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        mac.verify_slice(&signature).map_err(|_| ObsiLockError::Tamper)
    }
}
