//! Cryptography for ObsiLock.
//!
//! This module provides the content encryption engine and key management:
//! - Chunked AEAD encryption/decryption of file content (`cipher`)
//! - Envelope encryption of per-object content keys under the master key (`envelope`)
//! - Keyed signing of share bearer tokens (`signing`)

pub mod cipher;
pub mod envelope;
pub mod signing;

pub use cipher::{
    decrypt_stream, encrypt_stream, ContentKey, StreamEncryption, CIPHERTEXT_CHUNK_SIZE, KEY_SIZE,
    NONCE_SIZE, PLAINTEXT_CHUNK_SIZE, TAG_SIZE,
};
pub use envelope::{KeyEnvelope, MasterKey};
pub use signing::TokenSigner;
