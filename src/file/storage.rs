//! Blob storage for encrypted file content.
//!
//! Ciphertext blobs are addressed by an opaque stored name and kept in a
//! sharded directory structure:
//! ```text
//! {base_path}/
//! ├── ab/
//! │   └── ab12cd34-5678-90ab-cdef-123456789012.enc
//! ├── cd/
//! │   └── cd90ab12-3456-7890-abcd-ef1234567890.enc
//! └── ...
//! ```
//! The stored name is the only addressing contract; nothing about a blob's
//! location is derived from timestamps or upload metadata.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{ObsiLockError, Result};

/// Extension given to every ciphertext blob.
const BLOB_EXTENSION: &str = "enc";

/// Blob store over a local sharded directory.
#[derive(Debug, Clone)]
pub struct BlobStorage {
    /// Base directory for blob storage.
    base_path: PathBuf,
}

impl BlobStorage {
    /// Create a new BlobStorage with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Generate a fresh opaque stored name.
    pub fn generate_stored_name() -> String {
        format!("{}.{BLOB_EXTENSION}", Uuid::new_v4())
    }

    /// Create a blob for writing.
    ///
    /// The shard directory is created if needed. Callers stream ciphertext
    /// into the returned file and should `sync_all` before committing any
    /// database row that references the blob.
    pub fn create(&self, stored_name: &str) -> Result<File> {
        let path = self.blob_path(stored_name);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(File::create(&path)?)
    }

    /// Open a blob for reading.
    pub fn open(&self, stored_name: &str) -> Result<File> {
        let path = self.blob_path(stored_name);

        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ObsiLockError::NotFound(format!("blob {stored_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob. Idempotent.
    ///
    /// Returns `true` if the blob existed, `false` if it was already gone.
    pub fn delete(&self, stored_name: &str) -> Result<bool> {
        let path = self.blob_path(stored_name);

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a blob exists.
    pub fn exists(&self, stored_name: &str) -> bool {
        self.blob_path(stored_name).exists()
    }

    /// Get the size of a stored blob in bytes.
    pub fn blob_size(&self, stored_name: &str) -> Result<u64> {
        let path = self.blob_path(stored_name);

        match fs::metadata(&path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ObsiLockError::NotFound(format!("blob {stored_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get the full path for a stored name.
    ///
    /// The path is constructed as: {base_path}/{shard}/{stored_name}
    /// where shard is the first 2 characters of the stored name.
    pub fn blob_path(&self, stored_name: &str) -> PathBuf {
        let shard = Self::shard(stored_name);
        self.base_path.join(shard).join(stored_name)
    }

    /// Get the shard directory name for a stored name.
    fn shard(stored_name: &str) -> &str {
        if stored_name.len() >= 2 {
            &stored_name[..2]
        } else {
            stored_name
        }
    }
}
