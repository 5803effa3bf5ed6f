//! File service: the write and read paths of the encrypted store.
//!
//! Uploads run in a fixed order so every failure has a compensation:
//! encrypt to a fresh blob first (the plaintext size is unknown until the
//! stream is drained), then reserve quota, then commit the metadata rows.
//! A failed reserve deletes the blob; a failed commit deletes the blob and
//! releases the reservation. Orphaned blobs are therefore the worst case,
//! never phantom quota or metadata pointing at missing ciphertext.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::metadata::{FileMetadata, FileRepository, NewFile};
use super::storage::BlobStorage;
use super::version::{FileVersion, NewFileVersion, VersionRepository};
use super::MAX_FILENAME_LENGTH;
use crate::auth::require_owner;
use crate::crypto::{decrypt_stream, encrypt_stream, MasterKey, NONCE_SIZE};
use crate::db::{DbPool, QuotaUsage, UserRepository};
use crate::{ObsiLockError, Result};

/// Options for an upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Display filename.
    pub filename: String,
    /// MIME type, if known.
    pub mime_type: Option<String>,
    /// Containing folder, if any.
    pub folder_id: Option<i64>,
}

impl UploadOptions {
    /// Options with just a filename.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            folder_id: None,
        }
    }

    /// Set the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the containing folder.
    pub fn with_folder(mut self, folder_id: i64) -> Self {
        self.folder_id = Some(folder_id);
        self
    }
}

/// Outcome of a successful upload or version append.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Logical file ID.
    pub file_id: i64,
    /// Version number that was written.
    pub version: i64,
    /// Plaintext size in bytes.
    pub size: i64,
    /// SHA-256 hex checksum of the plaintext.
    pub checksum: String,
}

/// A fully decrypted and verified download.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// The logical file.
    pub file: FileMetadata,
    /// The version that was fetched.
    pub version: FileVersion,
    /// Decrypted plaintext. Only handed out after every chunk authenticated
    /// and the checksum matched.
    pub content: Vec<u8>,
}

/// Encrypted blob written during an upload, before any row exists for it.
struct PendingBlob {
    stored_name: String,
    size: i64,
    checksum: String,
    key_envelope: String,
    key_nonce: String,
    chunk_nonce_start: String,
}

impl PendingBlob {
    fn into_version(self, mime_type: Option<String>) -> NewFileVersion {
        NewFileVersion {
            stored_name: self.stored_name,
            size: self.size,
            checksum: self.checksum,
            mime_type,
            key_envelope: self.key_envelope,
            key_nonce: self.key_nonce,
            chunk_nonce_start: self.chunk_nonce_start,
        }
    }
}

/// Service coordinating cipher, envelope, blob store and quota ledger.
pub struct FileService<'a> {
    pool: &'a DbPool,
    storage: &'a BlobStorage,
    master_key: &'a MasterKey,
    max_file_size: u64,
}

impl<'a> FileService<'a> {
    /// Create a new file service.
    pub fn new(
        pool: &'a DbPool,
        storage: &'a BlobStorage,
        master_key: &'a MasterKey,
        max_file_size: u64,
    ) -> Self {
        Self {
            pool,
            storage,
            master_key,
            max_file_size,
        }
    }

    /// Upload a new file, creating it at version 1.
    pub async fn upload<R: Read>(
        &self,
        user_id: i64,
        reader: &mut R,
        options: &UploadOptions,
    ) -> Result<StoredObject> {
        validate_filename(&options.filename)?;

        let pending = self.encrypt_to_blob(reader)?;
        let size = pending.size;

        let users = UserRepository::new(self.pool);
        if let Err(e) = users.reserve_quota(user_id, size).await {
            self.discard_blob(&pending.stored_name);
            return Err(e);
        }

        let new_file = NewFile {
            user_id,
            folder_id: options.folder_id,
            filename: options.filename.clone(),
            mime_type: options.mime_type.clone(),
        };
        let stored_name = pending.stored_name.clone();
        let version_row = pending.into_version(options.mime_type.clone());

        let files = FileRepository::new(self.pool);
        let file = match files.create_with_version(&new_file, &version_row).await {
            Ok(file) => file,
            Err(e) => {
                self.discard_blob(&stored_name);
                if let Err(release_err) = users.release_quota(user_id, size).await {
                    warn!(user_id, error = %release_err, "failed to release quota after aborted upload");
                }
                return Err(e);
            }
        };

        info!(user_id, file_id = file.id, size, "stored new file");

        Ok(StoredObject {
            file_id: file.id,
            version: 1,
            size,
            checksum: version_row.checksum,
        })
    }

    /// Append a new version to an existing file.
    ///
    /// Earlier versions remain stored and decryptable; only the head moves.
    pub async fn add_version<R: Read>(
        &self,
        user_id: i64,
        file_id: i64,
        reader: &mut R,
        mime_type: Option<String>,
    ) -> Result<StoredObject> {
        let files = FileRepository::new(self.pool);
        let file = files
            .find(file_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("file".to_string()))?;
        require_owner(&file, user_id, "file")?;

        let pending = self.encrypt_to_blob(reader)?;
        let size = pending.size;

        let users = UserRepository::new(self.pool);
        if let Err(e) = users.reserve_quota(user_id, size).await {
            self.discard_blob(&pending.stored_name);
            return Err(e);
        }

        let stored_name = pending.stored_name.clone();
        let version_row = pending.into_version(mime_type);

        let version = match files.add_version(file_id, &version_row).await {
            Ok(version) => version,
            Err(e) => {
                self.discard_blob(&stored_name);
                if let Err(release_err) = users.release_quota(user_id, size).await {
                    warn!(user_id, error = %release_err, "failed to release quota after aborted version append");
                }
                return Err(e);
            }
        };

        info!(user_id, file_id, version = version.version, size, "appended file version");

        Ok(StoredObject {
            file_id,
            version: version.version,
            size,
            checksum: version_row.checksum,
        })
    }

    /// Fetch and decrypt a file.
    ///
    /// `version` of `None` fetches the current head. The plaintext is only
    /// returned if every chunk authenticates and the stored checksum matches;
    /// any failure yields an error and no partial content.
    pub async fn fetch(
        &self,
        user_id: i64,
        file_id: i64,
        version: Option<i64>,
    ) -> Result<DownloadResult> {
        let files = FileRepository::new(self.pool);
        let file = files
            .find(file_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("file".to_string()))?;
        require_owner(&file, user_id, "file")?;

        let wanted = version.unwrap_or(file.current_version);
        let version_row = VersionRepository::new(self.pool)
            .get(file_id, wanted)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound(format!("version {wanted} of file")))?;

        let content = self.decrypt_version(&version_row)?;

        Ok(DownloadResult {
            file,
            version: version_row,
            content,
        })
    }

    /// Delete a file with all of its versions.
    ///
    /// Quota is released for the sum of every version's plaintext size.
    /// Once the rows are gone the delete is committed: blob removal and the
    /// quota release are best-effort, logged and never turned into an error
    /// the caller would retry against a file that no longer exists.
    pub async fn delete_file(&self, user_id: i64, file_id: i64) -> Result<()> {
        let files = FileRepository::new(self.pool);
        let file = files
            .find(file_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("file".to_string()))?;
        require_owner(&file, user_id, "file")?;

        let versions = VersionRepository::new(self.pool).list_all(file_id).await?;
        let total_size: i64 = versions.iter().map(|v| v.size).sum();

        files.delete(file_id).await?;

        for version in &versions {
            if let Err(e) = self.storage.delete(&version.stored_name) {
                warn!(file_id, stored_name = %version.stored_name, error = %e,
                    "failed to delete blob for removed file");
            }
        }

        if let Err(e) = UserRepository::new(self.pool)
            .release_quota(user_id, total_size)
            .await
        {
            warn!(user_id, file_id, bytes = total_size, error = %e,
                "failed to release quota for deleted file");
        }

        info!(user_id, file_id, released = total_size, "deleted file");
        Ok(())
    }

    /// List a user's files, newest first.
    pub async fn list_files(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileMetadata>> {
        FileRepository::new(self.pool)
            .list_by_user(user_id, limit, offset)
            .await
    }

    /// List one folder of a user's files, newest first. `folder_id` of `None`
    /// selects files outside any folder.
    pub async fn list_folder(
        &self,
        user_id: i64,
        folder_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileMetadata>> {
        FileRepository::new(self.pool)
            .list_by_folder(user_id, folder_id, limit, offset)
            .await
    }

    /// List the versions of a file in ascending order.
    pub async fn list_versions(&self, user_id: i64, file_id: i64) -> Result<Vec<FileVersion>> {
        self.list_versions_page(user_id, file_id, i64::MAX, 0).await
    }

    /// Paginated version listing, ascending and stable.
    pub async fn list_versions_page(
        &self,
        user_id: i64,
        file_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileVersion>> {
        let file = FileRepository::new(self.pool)
            .find(file_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("file".to_string()))?;
        require_owner(&file, user_id, "file")?;

        VersionRepository::new(self.pool)
            .list(file_id, limit, offset)
            .await
    }

    /// Current quota usage for a user.
    pub async fn quota(&self, user_id: i64) -> Result<QuotaUsage> {
        UserRepository::new(self.pool).quota(user_id).await
    }

    /// Encrypt `reader` into a freshly named blob.
    ///
    /// The plaintext checksum and size are computed on the same pass as the
    /// encryption. The blob is synced before returning so a crash after the
    /// subsequent row commit cannot leave a referenced but unwritten blob.
    fn encrypt_to_blob<R: Read>(&self, reader: &mut R) -> Result<PendingBlob> {
        let stored_name = BlobStorage::generate_stored_name();
        let mut blob = self.storage.create(&stored_name)?;
        let mut hashing = HashingReader::new(reader);

        let encryption = match encrypt_stream(&mut hashing, &mut blob) {
            Ok(encryption) => encryption,
            Err(e) => {
                self.discard_blob(&stored_name);
                return Err(e);
            }
        };

        if let Err(e) = blob.sync_all() {
            self.discard_blob(&stored_name);
            return Err(e.into());
        }

        if hashing.bytes_read > self.max_file_size {
            self.discard_blob(&stored_name);
            return Err(ObsiLockError::Validation(format!(
                "file exceeds the maximum size of {} bytes",
                self.max_file_size
            )));
        }

        let envelope = self.master_key.wrap(&encryption.content_key)?;

        Ok(PendingBlob {
            stored_name,
            size: hashing.bytes_read as i64,
            checksum: hex::encode(hashing.hasher.finalize()),
            key_envelope: BASE64.encode(&envelope.envelope),
            key_nonce: BASE64.encode(envelope.nonce),
            chunk_nonce_start: BASE64.encode(encryption.chunk_nonce_start),
        })
    }

    /// Decrypt one version row into memory and verify its checksum.
    fn decrypt_version(&self, version: &FileVersion) -> Result<Vec<u8>> {
        let envelope = decode_base64(&version.key_envelope, "key envelope")?;
        let key_nonce = decode_base64(&version.key_nonce, "key nonce")?;
        let chunk_nonce = decode_base64(&version.chunk_nonce_start, "chunk nonce")?;

        let chunk_nonce_start: [u8; NONCE_SIZE] = chunk_nonce.as_slice().try_into().map_err(|_| {
            ObsiLockError::Integrity(format!(
                "chunk nonce must be {NONCE_SIZE} bytes, got {}",
                chunk_nonce.len()
            ))
        })?;

        let content_key = self.master_key.unwrap_key(&envelope, &key_nonce)?;

        let mut blob = self.storage.open(&version.stored_name)?;
        let mut content = Vec::with_capacity(version.size.max(0) as usize);
        decrypt_stream(&mut blob, &mut content, &content_key, &chunk_nonce_start)?;

        let checksum = hex::encode(Sha256::digest(&content));
        if checksum != version.checksum {
            return Err(ObsiLockError::Integrity(format!(
                "checksum mismatch for version {} (stored {}, computed {checksum})",
                version.version, version.checksum
            )));
        }
        if content.len() as i64 != version.size {
            return Err(ObsiLockError::Integrity(format!(
                "size mismatch for version {} (stored {}, decrypted {})",
                version.version,
                version.size,
                content.len()
            )));
        }

        Ok(content)
    }

    /// Best-effort removal of a blob that never got a committed row.
    fn discard_blob(&self, stored_name: &str) {
        if let Err(e) = self.storage.delete(stored_name) {
            warn!(stored_name, error = %e, "failed to discard orphaned blob");
        }
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(ObsiLockError::Validation(
            "filename must not be empty".to_string(),
        ));
    }
    if filename.chars().count() > MAX_FILENAME_LENGTH {
        return Err(ObsiLockError::Validation(format!(
            "filename must be at most {MAX_FILENAME_LENGTH} characters"
        )));
    }
    Ok(())
}

fn decode_base64(encoded: &str, what: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| ObsiLockError::Integrity(format!("stored {what} is not valid base64: {e}")))
}

/// Pass-through reader that hashes and counts the plaintext as the cipher
/// consumes it.
struct HashingReader<'r, R> {
    inner: &'r mut R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<'r, R: Read> HashingReader<'r, R> {
    fn new(inner: &'r mut R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for HashingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}
