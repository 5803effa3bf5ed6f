//! Logical file metadata.
//!
//! The files row is a mutable head pointer over the immutable version rows:
//! `size`, `checksum` and `current_version` always describe the latest
//! version. Head updates and version inserts happen in one transaction so a
//! reader never observes a head pointing at a missing version.

use tracing::debug;

use super::version::{FileVersion, NewFileVersion};
use crate::auth::Owned;
use crate::db::DbPool;
use crate::{ObsiLockError, Result};

/// Logical file entity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileMetadata {
    /// File ID.
    pub id: i64,
    /// Owning user ID.
    pub user_id: i64,
    /// Containing folder, if any.
    pub folder_id: Option<i64>,
    /// Display filename.
    pub filename: String,
    /// MIME type, if known.
    pub mime_type: Option<String>,
    /// Plaintext size of the current version in bytes.
    pub size: i64,
    /// SHA-256 hex checksum of the current version's plaintext.
    pub checksum: String,
    /// Latest version number.
    pub current_version: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl Owned for FileMetadata {
    fn owner_id(&self) -> i64 {
        self.user_id
    }
}

/// Data for creating a new logical file.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// Owning user ID.
    pub user_id: i64,
    /// Containing folder, if any.
    pub folder_id: Option<i64>,
    /// Display filename.
    pub filename: String,
    /// MIME type, if known.
    pub mime_type: Option<String>,
}

const SELECT_FILE: &str = "SELECT id, user_id, folder_id, filename, mime_type, size, checksum,
        current_version, created_at, updated_at FROM files";

/// Repository for logical files and their version heads.
pub struct FileRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FileRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get a file by ID.
    pub async fn find(&self, id: i64) -> Result<Option<FileMetadata>> {
        let file = sqlx::query_as::<_, FileMetadata>(&format!("{SELECT_FILE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(file)
    }

    /// List a user's files, newest first.
    pub async fn list_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileMetadata>> {
        let files = sqlx::query_as::<_, FileMetadata>(&format!(
            "{SELECT_FILE} WHERE user_id = $1
             ORDER BY updated_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(files)
    }

    /// List a user's files in one folder, newest first. `None` selects files
    /// outside any folder.
    pub async fn list_by_folder(
        &self,
        user_id: i64,
        folder_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileMetadata>> {
        let files = sqlx::query_as::<_, FileMetadata>(&format!(
            "{SELECT_FILE} WHERE user_id = $1 AND folder_id IS $2
             ORDER BY updated_at DESC, id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(folder_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(files)
    }

    /// Number of files a user owns.
    pub async fn count_by_user(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(count)
    }

    /// Create a logical file together with its version 1 row.
    ///
    /// Both rows commit atomically; a file without at least one version never
    /// becomes visible.
    pub async fn create_with_version(
        &self,
        new_file: &NewFile,
        first_version: &NewFileVersion,
    ) -> Result<FileMetadata> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        let file_id: i64 = sqlx::query_scalar(
            "INSERT INTO files (user_id, folder_id, filename, mime_type, size, checksum, current_version)
             VALUES ($1, $2, $3, $4, $5, $6, 1) RETURNING id",
        )
        .bind(new_file.user_id)
        .bind(new_file.folder_id)
        .bind(&new_file.filename)
        .bind(&new_file.mime_type)
        .bind(first_version.size)
        .bind(&first_version.checksum)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        insert_version(&mut tx, file_id, 1, first_version).await?;

        tx.commit()
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        debug!(file_id, filename = %new_file.filename, "created file with version 1");

        self.find(file_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("file".to_string()))
    }

    /// Append a new version to an existing file and advance its head.
    ///
    /// The version number is allocated inside the transaction as
    /// `MAX(version) + 1`, so concurrent appends to the same file serialize
    /// on the `(file_id, version)` uniqueness constraint rather than racing.
    pub async fn add_version(
        &self,
        file_id: i64,
        new_version: &NewFileVersion,
    ) -> Result<FileVersion> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM files WHERE id = $1)")
            .bind(file_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;
        if !exists {
            return Err(ObsiLockError::NotFound("file".to_string()));
        }

        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM file_versions WHERE file_id = $1",
        )
        .bind(file_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        insert_version(&mut tx, file_id, version, new_version).await?;

        sqlx::query(
            "UPDATE files SET size = $2, checksum = $3, current_version = $4,
                    updated_at = datetime('now')
             WHERE id = $1",
        )
        .bind(file_id)
        .bind(new_version.size)
        .bind(&new_version.checksum)
        .bind(version)
        .execute(&mut *tx)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        debug!(file_id, version, "appended file version");

        let row = sqlx::query_as::<_, FileVersion>(
            "SELECT id, file_id, version, stored_name, size, checksum, mime_type,
                    key_envelope, key_nonce, chunk_nonce_start, created_at
             FROM file_versions WHERE file_id = $1 AND version = $2",
        )
        .bind(file_id)
        .bind(version)
        .fetch_one(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(row)
    }

    /// Delete a file row. Version rows go with it via ON DELETE CASCADE.
    ///
    /// Returns `true` if a row was deleted.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

async fn insert_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    file_id: i64,
    version: i64,
    row: &NewFileVersion,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO file_versions
             (file_id, version, stored_name, size, checksum, mime_type,
              key_envelope, key_nonce, chunk_nonce_start)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(file_id)
    .bind(version)
    .bind(&row.stored_name)
    .bind(row.size)
    .bind(&row.checksum)
    .bind(&row.mime_type)
    .bind(&row.key_envelope)
    .bind(&row.key_nonce)
    .bind(&row.chunk_nonce_start)
    .execute(&mut **tx)
    .await
    .map_err(|e| ObsiLockError::Database(e.to_string()))?;

    Ok(())
}
