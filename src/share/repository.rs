//! Share row storage.
//!
//! The use counter is decremented with a conditional UPDATE guarded by
//! `remaining_uses > 0`, so concurrent redemptions of a limited share can
//! never consume more uses than were granted.

use crate::auth::Owned;
use crate::db::DbPool;
use crate::{ObsiLockError, Result};

use super::ShareKind;

/// Share entity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Share {
    /// Share ID.
    pub id: i64,
    /// Owning user ID.
    pub user_id: i64,
    /// Target kind, see [`ShareKind`].
    pub kind: String,
    /// Shared file or folder ID.
    pub target_id: i64,
    /// Bearer token.
    pub token: String,
    /// Hex HMAC signature of the token.
    pub token_signature: String,
    /// Optional display label.
    pub label: Option<String>,
    /// Expiry timestamp, `None` for no expiry.
    pub expires_at: Option<String>,
    /// Granted uses, `None` for unlimited.
    pub max_uses: Option<i64>,
    /// Uses left, `None` for unlimited.
    pub remaining_uses: Option<i64>,
    /// Whether the owner revoked the share.
    pub is_revoked: bool,
    /// Creation timestamp.
    pub created_at: String,
}

impl Share {
    /// Parsed target kind.
    pub fn kind(&self) -> Result<ShareKind> {
        ShareKind::parse(&self.kind)
    }
}

impl Owned for Share {
    fn owner_id(&self) -> i64 {
        self.user_id
    }
}

/// Data for creating a share.
#[derive(Debug, Clone)]
pub struct NewShare {
    /// Owning user ID.
    pub user_id: i64,
    /// Target kind.
    pub kind: ShareKind,
    /// Shared file or folder ID.
    pub target_id: i64,
    /// Bearer token.
    pub token: String,
    /// Hex HMAC signature of the token.
    pub token_signature: String,
    /// Optional display label.
    pub label: Option<String>,
    /// Expiry timestamp, `None` for no expiry.
    pub expires_at: Option<String>,
    /// Granted uses, `None` for unlimited.
    pub max_uses: Option<i64>,
}

const SELECT_SHARE: &str = "SELECT id, user_id, kind, target_id, token, token_signature, label,
        expires_at, max_uses, remaining_uses, is_revoked, created_at FROM shares";

/// Repository for share rows.
pub struct ShareRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ShareRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a share. `remaining_uses` starts at `max_uses`.
    pub async fn create(&self, new_share: &NewShare) -> Result<Share> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO shares
                 (user_id, kind, target_id, token, token_signature, label,
                  expires_at, max_uses, remaining_uses)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING id",
        )
        .bind(new_share.user_id)
        .bind(new_share.kind.as_str())
        .bind(new_share.target_id)
        .bind(&new_share.token)
        .bind(&new_share.token_signature)
        .bind(&new_share.label)
        .bind(&new_share.expires_at)
        .bind(new_share.max_uses)
        .fetch_one(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("share".to_string()))
    }

    /// Get a share by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Share>> {
        let share = sqlx::query_as::<_, Share>(&format!("{SELECT_SHARE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(share)
    }

    /// Get a share by its bearer token.
    pub async fn get_by_token(&self, token: &str) -> Result<Option<Share>> {
        let share = sqlx::query_as::<_, Share>(&format!("{SELECT_SHARE} WHERE token = $1"))
            .bind(token)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(share)
    }

    /// List a user's shares, newest first.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Share>> {
        let shares = sqlx::query_as::<_, Share>(&format!(
            "{SELECT_SHARE} WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(shares)
    }

    /// Mark a share revoked. Idempotent.
    pub async fn revoke(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE shares SET is_revoked = 1 WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ObsiLockError::NotFound("share".to_string()));
        }
        Ok(())
    }

    /// Consume one use of a limited share.
    ///
    /// Returns `true` if a use was consumed (or the share is unlimited),
    /// `false` if the counter was already at zero.
    pub async fn decrement_uses(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE shares SET remaining_uses = remaining_uses - 1
             WHERE id = $1 AND remaining_uses > 0",
        )
        .bind(id)
        .execute(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Unlimited shares have a NULL counter and nothing to decrement.
        match self.get_by_id(id).await? {
            None => Err(ObsiLockError::NotFound("share".to_string())),
            Some(share) => Ok(share.remaining_uses.is_none()),
        }
    }
}
