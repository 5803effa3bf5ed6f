//! Immutable encrypted file versions.
//!
//! A version row carries everything needed to decrypt its blob: the wrapped
//! content key, the wrap nonce and the first chunk nonce, all stored as
//! base64 text. Version rows are never updated after insertion.

use crate::db::DbPool;
use crate::{ObsiLockError, Result};

/// One immutable encrypted version of a logical file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileVersion {
    /// Version row ID.
    pub id: i64,
    /// Owning file ID.
    pub file_id: i64,
    /// Version number, starting at 1.
    pub version: i64,
    /// Opaque blob handle in storage.
    pub stored_name: String,
    /// Plaintext size in bytes.
    pub size: i64,
    /// SHA-256 hex checksum of the plaintext.
    pub checksum: String,
    /// MIME type at upload time, if known.
    pub mime_type: Option<String>,
    /// Base64 wrapped content key.
    pub key_envelope: String,
    /// Base64 nonce the content key was wrapped under.
    pub key_nonce: String,
    /// Base64 nonce of ciphertext chunk 0.
    pub chunk_nonce_start: String,
    /// Creation timestamp.
    pub created_at: String,
}

/// Data for inserting a new version row.
#[derive(Debug, Clone)]
pub struct NewFileVersion {
    /// Opaque blob handle in storage.
    pub stored_name: String,
    /// Plaintext size in bytes.
    pub size: i64,
    /// SHA-256 hex checksum of the plaintext.
    pub checksum: String,
    /// MIME type at upload time, if known.
    pub mime_type: Option<String>,
    /// Base64 wrapped content key.
    pub key_envelope: String,
    /// Base64 nonce the content key was wrapped under.
    pub key_nonce: String,
    /// Base64 nonce of ciphertext chunk 0.
    pub chunk_nonce_start: String,
}

/// Repository for version rows.
pub struct VersionRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> VersionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get one version of a file.
    pub async fn get(&self, file_id: i64, version: i64) -> Result<Option<FileVersion>> {
        let row = sqlx::query_as::<_, FileVersion>(
            "SELECT id, file_id, version, stored_name, size, checksum, mime_type,
                    key_envelope, key_nonce, chunk_nonce_start, created_at
             FROM file_versions WHERE file_id = $1 AND version = $2",
        )
        .bind(file_id)
        .bind(version)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(row)
    }

    /// List versions of a file in ascending version order.
    pub async fn list(&self, file_id: i64, limit: i64, offset: i64) -> Result<Vec<FileVersion>> {
        let rows = sqlx::query_as::<_, FileVersion>(
            "SELECT id, file_id, version, stored_name, size, checksum, mime_type,
                    key_envelope, key_nonce, chunk_nonce_start, created_at
             FROM file_versions WHERE file_id = $1
             ORDER BY version ASC LIMIT $2 OFFSET $3",
        )
        .bind(file_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(rows)
    }

    /// List every version of a file in ascending version order.
    pub async fn list_all(&self, file_id: i64) -> Result<Vec<FileVersion>> {
        let rows = sqlx::query_as::<_, FileVersion>(
            "SELECT id, file_id, version, stored_name, size, checksum, mime_type,
                    key_envelope, key_nonce, chunk_nonce_start, created_at
             FROM file_versions WHERE file_id = $1 ORDER BY version ASC",
        )
        .bind(file_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(rows)
    }

    /// Number of versions a file has.
    pub async fn count(&self, file_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM file_versions WHERE file_id = $1")
                .bind(file_id)
                .fetch_one(self.pool)
                .await
                .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileRepository, NewFile};
    use crate::Database;

    fn sample_version(n: u32) -> NewFileVersion {
        NewFileVersion {
            stored_name: format!("blob-{n}.enc"),
            size: 100 + n as i64,
            checksum: format!("checksum-{n}"),
            mime_type: Some("text/plain".to_string()),
            key_envelope: "ZW52ZWxvcGU=".to_string(),
            key_nonce: "bm9uY2U=".to_string(),
            chunk_nonce_start: "Y2h1bms=".to_string(),
        }
    }

    async fn setup_file(db: &Database) -> i64 {
        sqlx::query("INSERT INTO users (email, password) VALUES ('a@b.c', 'hash')")
            .execute(db.pool())
            .await
            .unwrap();

        let files = FileRepository::new(db.pool());
        let file = files
            .create_with_version(
                &NewFile {
                    user_id: 1,
                    folder_id: None,
                    filename: "notes.txt".to_string(),
                    mime_type: Some("text/plain".to_string()),
                },
                &sample_version(1),
            )
            .await
            .unwrap();
        file.id
    }

    #[tokio::test]
    async fn test_get_version() {
        let db = Database::open_in_memory().await.unwrap();
        let file_id = setup_file(&db).await;
        let repo = VersionRepository::new(db.pool());

        let v1 = repo.get(file_id, 1).await.unwrap().unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v1.stored_name, "blob-1.enc");
        assert_eq!(v1.checksum, "checksum-1");

        assert!(repo.get(file_id, 2).await.unwrap().is_none());
        assert!(repo.get(9999, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_ascending() {
        let db = Database::open_in_memory().await.unwrap();
        let file_id = setup_file(&db).await;

        let files = FileRepository::new(db.pool());
        files.add_version(file_id, &sample_version(2)).await.unwrap();
        files.add_version(file_id, &sample_version(3)).await.unwrap();

        let repo = VersionRepository::new(db.pool());
        let all = repo.list_all(file_id).await.unwrap();
        let numbers: Vec<i64> = all.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let page = repo.list(file_id, 2, 1).await.unwrap();
        let numbers: Vec<i64> = page.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![2, 3]);

        assert_eq!(repo.count(file_id).await.unwrap(), 3);
    }
}
