//! User repository and per-user quota ledger.
//!
//! Quota reservation and release are the storage-coupled accounting
//! operations: a reserve that succeeds but whose paired store write fails
//! must be compensated by a matching release (the file service does this).
//! Reserves are a single conditional UPDATE so concurrent uploads can never
//! push `quota_used` past `quota_total`.

use super::DbPool;
use crate::{ObsiLockError, Result};

/// Default per-user quota: 1 GiB.
pub const DEFAULT_QUOTA_BYTES: i64 = 1024 * 1024 * 1024;

/// User entity.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    /// User ID.
    pub id: i64,
    /// Email address.
    pub email: String,
    /// Password hash (written by the external auth layer).
    pub password: String,
    /// Total quota in bytes.
    pub quota_total: i64,
    /// Used quota in bytes.
    pub quota_used: i64,
    /// Creation timestamp.
    pub created_at: String,
}

/// New user for creation.
pub struct NewUser {
    /// Email address.
    pub email: String,
    /// Password hash.
    pub password: String,
    /// Total quota in bytes.
    pub quota_total: i64,
}

impl NewUser {
    /// Create a new user record with the default quota.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            quota_total: DEFAULT_QUOTA_BYTES,
        }
    }

    /// Set the total quota in bytes.
    pub fn with_quota_total(mut self, quota_total: i64) -> Self {
        self.quota_total = quota_total;
        self
    }
}

/// Quota usage snapshot for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    /// Total quota in bytes.
    pub total: i64,
    /// Used bytes.
    pub used: i64,
}

impl QuotaUsage {
    /// Remaining bytes.
    pub fn remaining(&self) -> i64 {
        self.total - self.used
    }

    /// Used percentage, 0.0 for a zero-byte quota.
    pub fn percent_used(&self) -> f64 {
        if self.total <= 0 {
            0.0
        } else {
            (self.used as f64 / self.total as f64) * 100.0
        }
    }
}

/// Repository for user and quota operations.
pub struct UserRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> UserRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new user.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, password, quota_total) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&new_user.email)
        .bind(&new_user.password)
        .bind(new_user.quota_total)
        .fetch_one(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("user".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password, quota_total, quota_used, created_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(user)
    }

    /// Get a user by email address.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password, quota_total, quota_used, created_at
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        Ok(user)
    }

    /// Reserve `bytes` of quota for a user.
    ///
    /// A single conditional UPDATE guarded by
    /// `quota_used + bytes <= quota_total`: either the reservation commits in
    /// full or nothing is mutated and `QuotaExceeded` is returned.
    pub async fn reserve_quota(&self, user_id: i64, bytes: i64) -> Result<()> {
        if bytes < 0 {
            return Err(ObsiLockError::Validation(
                "quota reservation must not be negative".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE users SET quota_used = quota_used + $2
             WHERE id = $1 AND quota_used + $2 <= quota_total",
        )
        .bind(user_id)
        .bind(bytes)
        .execute(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Distinguish a missing user from an exhausted quota.
        match self.get_by_id(user_id).await? {
            None => Err(ObsiLockError::NotFound("user".to_string())),
            Some(user) => Err(ObsiLockError::QuotaExceeded(format!(
                "{} of {} bytes used, {} more requested",
                user.quota_used, user.quota_total, bytes
            ))),
        }
    }

    /// Release `bytes` of quota, floored at 0.
    pub async fn release_quota(&self, user_id: i64, bytes: i64) -> Result<()> {
        if bytes < 0 {
            return Err(ObsiLockError::Validation(
                "quota release must not be negative".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE users SET quota_used = MAX(quota_used - $2, 0) WHERE id = $1",
        )
        .bind(user_id)
        .bind(bytes)
        .execute(self.pool)
        .await
        .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ObsiLockError::NotFound("user".to_string()));
        }
        Ok(())
    }

    /// Current quota usage for a user.
    pub async fn quota(&self, user_id: i64) -> Result<QuotaUsage> {
        let user = self
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("user".to_string()))?;

        Ok(QuotaUsage {
            total: user.quota_total,
            used: user.quota_used,
        })
    }
}
