//! Chunked AEAD content cipher.
//!
//! File content is processed in fixed 8 KiB plaintext chunks. Each chunk is
//! sealed with XChaCha20-Poly1305 under a per-object content key; the nonce
//! for chunk `i` is the randomly drawn start nonce plus `i`, treated as a
//! big-endian 192-bit counter. Decryption reproduces the same nonce sequence
//! and rejects the whole stream on any chunk authentication failure.

use std::fmt;
use std::io::{self, Read, Write};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{ObsiLockError, Result};

/// Content key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce length in bytes (XChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Plaintext chunk size in bytes.
pub const PLAINTEXT_CHUNK_SIZE: usize = 8192;

/// Ciphertext chunk size in bytes (plaintext + tag). The last chunk may be shorter.
pub const CIPHERTEXT_CHUNK_SIZE: usize = PLAINTEXT_CHUNK_SIZE + TAG_SIZE;

/// An ephemeral per-object content key.
///
/// The key bytes are zeroed when the value is dropped.
pub struct ContentKey(Zeroizing<[u8; KEY_SIZE]>);

impl ContentKey {
    /// Generate a fresh random content key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(Zeroizing::new(key))
    }

    /// Construct a content key from raw bytes (e.g. an unwrapped envelope).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw key bytes.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Result of encrypting a stream: the ephemeral content key and the nonce
/// the first chunk was sealed with.
pub struct StreamEncryption {
    /// The content key the stream was sealed under. Must be wrapped and
    /// persisted before it is dropped, or the ciphertext is unrecoverable.
    pub content_key: ContentKey,
    /// Nonce of chunk 0.
    pub chunk_nonce_start: [u8; NONCE_SIZE],
    /// Total ciphertext bytes written.
    pub ciphertext_len: u64,
}

/// Encrypt `reader` into `writer` in fixed chunks under a fresh content key.
///
/// An empty input still produces one (tag-only) authenticated chunk, so that
/// empty objects are tamper-evident too.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> Result<StreamEncryption> {
    let content_key = ContentKey::generate();
    let mut chunk_nonce_start = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut chunk_nonce_start);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(content_key.as_bytes()));
    let mut nonce = Zeroizing::new(chunk_nonce_start);
    let mut buf = Zeroizing::new([0u8; PLAINTEXT_CHUNK_SIZE]);
    let mut ciphertext_len = 0u64;
    let mut sealed_any = false;

    loop {
        let n = read_chunk(reader, &mut buf[..])?;
        if n == 0 && sealed_any {
            break;
        }

        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce[..]), &buf[..n])
            .map_err(|_| ObsiLockError::Integrity("chunk encryption failed".to_string()))?;
        writer.write_all(&sealed)?;
        ciphertext_len += sealed.len() as u64;

        increment_nonce(&mut nonce);
        sealed_any = true;

        if n < PLAINTEXT_CHUNK_SIZE {
            break;
        }
    }

    writer.flush()?;

    Ok(StreamEncryption {
        content_key,
        chunk_nonce_start,
        ciphertext_len,
    })
}

/// Decrypt `reader` into `writer`, reproducing the chunk nonce sequence from
/// `chunk_nonce_start`.
///
/// Fails with `Integrity` on any chunk authentication failure or on a stream
/// cut inside a chunk. A stream cut at an exact chunk boundary is
/// indistinguishable from the end of a shorter object, so callers must check
/// the returned plaintext length (or a checksum) against stored metadata
/// before trusting the output. Callers that must guarantee no partial
/// plaintext escapes should decrypt into a discardable sink and hand it over
/// only after those checks pass; the file service does both.
///
/// Returns the number of plaintext bytes produced.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    content_key: &ContentKey,
    chunk_nonce_start: &[u8; NONCE_SIZE],
) -> Result<u64> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(content_key.as_bytes()));
    let mut nonce = Zeroizing::new(*chunk_nonce_start);
    let mut buf = [0u8; CIPHERTEXT_CHUNK_SIZE];
    let mut plaintext_len = 0u64;
    let mut opened_any = false;

    loop {
        let n = read_chunk(reader, &mut buf)?;
        if n == 0 {
            if opened_any {
                break;
            }
            // Even an empty object encrypts to one tag-only chunk.
            return Err(ObsiLockError::Integrity("empty ciphertext".to_string()));
        }
        if n < TAG_SIZE {
            return Err(ObsiLockError::Integrity(
                "truncated ciphertext chunk".to_string(),
            ));
        }

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(&nonce[..]), &buf[..n])
                .map_err(|_| {
                    ObsiLockError::Integrity("chunk authentication failed".to_string())
                })?,
        );
        writer.write_all(&plaintext)?;
        plaintext_len += plaintext.len() as u64;

        increment_nonce(&mut nonce);
        opened_any = true;

        if n < CIPHERTEXT_CHUNK_SIZE {
            break;
        }
    }

    writer.flush()?;
    Ok(plaintext_len)
}

/// Read until `buf` is full or the reader is exhausted.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Increment the nonce as a big-endian 192-bit counter.
fn increment_nonce(nonce: &mut [u8; NONCE_SIZE]) {
    for byte in nonce.iter_mut().rev() {
        let (value, carry) = byte.overflowing_add(1);
        *byte = value;
        if !carry {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn roundtrip(plaintext: &[u8]) -> Vec<u8> {
        let mut ciphertext = Vec::new();
        let enc = encrypt_stream(&mut &plaintext[..], &mut ciphertext).unwrap();
        assert_eq!(enc.ciphertext_len, ciphertext.len() as u64);

        let mut decrypted = Vec::new();
        let len = decrypt_stream(
            &mut &ciphertext[..],
            &mut decrypted,
            &enc.content_key,
            &enc.chunk_nonce_start,
        )
        .unwrap();
        assert_eq!(len, decrypted.len() as u64);
        decrypted
    }

    #[test]
    fn test_roundtrip_empty() {
        assert_eq!(roundtrip(b""), b"");
    }

    #[test]
    fn test_roundtrip_sub_chunk() {
        let data = b"Hello ObsiLock!".to_vec();
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_roundtrip_exact_chunk() {
        let data = vec![0x5A; PLAINTEXT_CHUNK_SIZE];
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_roundtrip_exact_multiple() {
        let data: Vec<u8> = (0..PLAINTEXT_CHUNK_SIZE * 3).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_roundtrip_multi_chunk_with_remainder() {
        let data: Vec<u8> = (0..PLAINTEXT_CHUNK_SIZE * 2 + 1337)
            .map(|i| (i % 255) as u8)
            .collect();
        assert_eq!(roundtrip(&data), data);
    }

    #[test]
    fn test_empty_input_produces_tag_only_chunk() {
        let mut ciphertext = Vec::new();
        encrypt_stream(&mut &b""[..], &mut ciphertext).unwrap();
        assert_eq!(ciphertext.len(), TAG_SIZE);
    }

    #[test]
    fn test_ciphertext_chunk_layout() {
        let data = vec![1u8; PLAINTEXT_CHUNK_SIZE + 100];
        let mut ciphertext = Vec::new();
        encrypt_stream(&mut &data[..], &mut ciphertext).unwrap();
        assert_eq!(ciphertext.len(), CIPHERTEXT_CHUNK_SIZE + 100 + TAG_SIZE);
    }

    #[test]
    fn test_tamper_any_chunk_fails() {
        let data: Vec<u8> = (0..PLAINTEXT_CHUNK_SIZE * 2 + 500)
            .map(|i| (i % 250) as u8)
            .collect();
        let mut ciphertext = Vec::new();
        let enc = encrypt_stream(&mut &data[..], &mut ciphertext).unwrap();

        // Flip one bit in the first, middle and last chunk in turn.
        for &pos in &[0usize, CIPHERTEXT_CHUNK_SIZE + 17, ciphertext.len() - 1] {
            let mut tampered = ciphertext.clone();
            tampered[pos] ^= 0x01;

            let mut out = Vec::new();
            let result = decrypt_stream(
                &mut &tampered[..],
                &mut out,
                &enc.content_key,
                &enc.chunk_nonce_start,
            );
            assert!(matches!(result, Err(ObsiLockError::Integrity(_))));
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut ciphertext = Vec::new();
        let enc = encrypt_stream(&mut &b"secret"[..], &mut ciphertext).unwrap();

        let wrong = ContentKey::generate();
        let mut out = Vec::new();
        let result = decrypt_stream(&mut &ciphertext[..], &mut out, &wrong, &enc.chunk_nonce_start);
        assert!(matches!(result, Err(ObsiLockError::Integrity(_))));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let data = vec![7u8; 100];
        let mut ciphertext = Vec::new();
        let enc = encrypt_stream(&mut &data[..], &mut ciphertext).unwrap();

        let truncated = &ciphertext[..TAG_SIZE - 1];
        let mut out = Vec::new();
        let result = decrypt_stream(
            &mut &truncated[..],
            &mut out,
            &enc.content_key,
            &enc.chunk_nonce_start,
        );
        assert!(matches!(result, Err(ObsiLockError::Integrity(_))));
    }

    #[test]
    fn test_truncation_at_chunk_boundary_needs_length_check() {
        let data = vec![9u8; PLAINTEXT_CHUNK_SIZE * 2];
        let mut ciphertext = Vec::new();
        let enc = encrypt_stream(&mut &data[..], &mut ciphertext).unwrap();

        // Dropping whole trailing chunks leaves a stream that reads like the
        // end of a shorter object: decryption succeeds with a prefix. The
        // stored plaintext length and checksum are what reject this.
        let truncated = &ciphertext[..CIPHERTEXT_CHUNK_SIZE];
        let mut out = Vec::new();
        let len = decrypt_stream(
            &mut &truncated[..],
            &mut out,
            &enc.content_key,
            &enc.chunk_nonce_start,
        )
        .unwrap();
        assert_eq!(len, PLAINTEXT_CHUNK_SIZE as u64);
        assert_eq!(out, &data[..PLAINTEXT_CHUNK_SIZE]);
        assert_ne!(len, data.len() as u64);
    }

    #[test]
    fn test_empty_ciphertext_fails() {
        let enc = encrypt_stream(&mut &b"x"[..], &mut Vec::new()).unwrap();
        let mut out = Vec::new();
        let result = decrypt_stream(&mut &b""[..], &mut out, &enc.content_key, &enc.chunk_nonce_start);
        assert!(matches!(result, Err(ObsiLockError::Integrity(_))));
    }

    #[test]
    fn test_increment_nonce_simple() {
        let mut nonce = [0u8; NONCE_SIZE];
        increment_nonce(&mut nonce);
        assert_eq!(nonce[NONCE_SIZE - 1], 1);
        assert!(nonce[..NONCE_SIZE - 1].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_increment_nonce_carry() {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[NONCE_SIZE - 1] = 0xFF;
        increment_nonce(&mut nonce);
        assert_eq!(nonce[NONCE_SIZE - 1], 0);
        assert_eq!(nonce[NONCE_SIZE - 2], 1);
    }

    #[test]
    fn test_increment_nonce_full_carry() {
        let mut nonce = [0xFFu8; NONCE_SIZE];
        increment_nonce(&mut nonce);
        assert!(nonce.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_nonce_key_pairs_do_not_collide() {
        // 10^5 independently generated (key, nonce start) pairs must be unique.
        let mut seen = HashSet::with_capacity(100_000);
        for _ in 0..100_000 {
            let key = ContentKey::generate();
            let mut nonce = [0u8; NONCE_SIZE];
            OsRng.fill_bytes(&mut nonce);

            let mut pair = Vec::with_capacity(KEY_SIZE + NONCE_SIZE);
            pair.extend_from_slice(key.as_bytes());
            pair.extend_from_slice(&nonce);
            assert!(seen.insert(pair), "duplicate (key, nonce) pair generated");
        }
    }
}
