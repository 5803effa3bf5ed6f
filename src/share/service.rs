//! Share lifecycle: creation, token verification, validity and redemption.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};

use super::repository::{NewShare, Share, ShareRepository};
use super::{ShareKind, ShareValidity};
use crate::auth::require_owner;
use crate::crypto::TokenSigner;
use crate::db::DbPool;
use crate::{ObsiLockError, Result};

/// Timestamp format used for share expiry.
const EXPIRES_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Optional attributes of a new share.
#[derive(Debug, Clone, Default)]
pub struct ShareOptions {
    /// Display label.
    pub label: Option<String>,
    /// Expiry instant, `None` for no expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted uses, `None` for unlimited.
    pub max_uses: Option<i64>,
}

impl ShareOptions {
    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the expiry instant.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Limit the number of uses.
    pub fn with_max_uses(mut self, max_uses: i64) -> Self {
        self.max_uses = Some(max_uses);
        self
    }
}

/// Outcome of redeeming a share token.
#[derive(Debug, Clone)]
pub enum Redemption {
    /// The share was valid; a use was consumed if it is limited.
    Granted {
        /// The redeemed share.
        share: Share,
    },
    /// The share exists and its token is authentic, but it cannot be used.
    Denied {
        /// Why redemption was refused.
        validity: ShareValidity,
    },
}

/// Service for share capabilities.
pub struct ShareService<'a> {
    pool: &'a DbPool,
    signer: &'a TokenSigner,
}

impl<'a> ShareService<'a> {
    /// Create a new share service.
    pub fn new(pool: &'a DbPool, signer: &'a TokenSigner) -> Self {
        Self { pool, signer }
    }

    /// Create a share over a target the user owns.
    pub async fn create(
        &self,
        user_id: i64,
        kind: ShareKind,
        target_id: i64,
        options: &ShareOptions,
    ) -> Result<Share> {
        if let Some(max_uses) = options.max_uses {
            if max_uses <= 0 {
                return Err(ObsiLockError::Validation(
                    "max_uses must be positive".to_string(),
                ));
            }
        }
        self.check_target_owner(user_id, kind, target_id).await?;

        let token = TokenSigner::generate_token();
        let token_signature = self.signer.sign(&token);

        let share = ShareRepository::new(self.pool)
            .create(&NewShare {
                user_id,
                kind,
                target_id,
                token,
                token_signature,
                label: options.label.clone(),
                expires_at: options
                    .expires_at
                    .map(|t| t.format(EXPIRES_FORMAT).to_string()),
                max_uses: options.max_uses,
            })
            .await?;

        info!(user_id, share_id = share.id, kind = kind.as_str(), target_id, "created share");
        Ok(share)
    }

    /// Look up a share by token, verifying the token signature first.
    ///
    /// A signature mismatch is logged as a tamper signal and fails before the
    /// row is trusted; an unknown token is a plain lookup failure.
    pub async fn get_by_token(&self, token: &str) -> Result<Share> {
        let share = ShareRepository::new(self.pool)
            .get_by_token(token)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("share".to_string()))?;

        if let Err(e) = self.signer.verify(token, &share.token_signature) {
            warn!(share_id = share.id, "share token signature mismatch");
            return Err(e);
        }

        Ok(share)
    }

    /// Validity of a share at `now`.
    ///
    /// Pure with respect to the database: revocation wins over expiry, expiry
    /// over exhaustion. An unparseable expiry timestamp counts as expired.
    pub fn validity(&self, share: &Share, now: DateTime<Utc>) -> ShareValidity {
        if share.is_revoked {
            return ShareValidity::Revoked;
        }

        // A share expires once `now` is strictly past expires_at; at the
        // exact expiry second it is still redeemable.
        if let Some(expires_at) = &share.expires_at {
            match NaiveDateTime::parse_from_str(expires_at, EXPIRES_FORMAT) {
                Ok(expiry) if now.naive_utc() <= expiry => {}
                _ => return ShareValidity::Expired,
            }
        }

        if share.remaining_uses == Some(0) {
            return ShareValidity::NoUsesLeft;
        }

        ShareValidity::Valid
    }

    /// Redeem a token: verify, check validity, and consume one use.
    ///
    /// The use counter decrement is conditional, so two concurrent redemptions
    /// of a share with one use left resolve to one grant and one denial.
    pub async fn redeem(&self, token: &str, now: DateTime<Utc>) -> Result<Redemption> {
        let share = self.get_by_token(token).await?;

        let validity = self.validity(&share, now);
        if !validity.is_valid() {
            return Ok(Redemption::Denied { validity });
        }

        let consumed = ShareRepository::new(self.pool)
            .decrement_uses(share.id)
            .await?;
        if !consumed {
            return Ok(Redemption::Denied {
                validity: ShareValidity::NoUsesLeft,
            });
        }

        // Re-read so the returned counter reflects this redemption.
        let share = ShareRepository::new(self.pool)
            .get_by_id(share.id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("share".to_string()))?;

        info!(share_id = share.id, "share redeemed");
        Ok(Redemption::Granted { share })
    }

    /// Consume one use of a share without a full redemption.
    ///
    /// Returns `true` if a use was consumed (or the share is unlimited).
    pub async fn decrement_uses(&self, share_id: i64) -> Result<bool> {
        ShareRepository::new(self.pool).decrement_uses(share_id).await
    }

    /// Revoke a share the user owns. Idempotent.
    pub async fn revoke(&self, user_id: i64, share_id: i64) -> Result<()> {
        let repo = ShareRepository::new(self.pool);
        let share = repo
            .get_by_id(share_id)
            .await?
            .ok_or_else(|| ObsiLockError::NotFound("share".to_string()))?;
        require_owner(&share, user_id, "share")?;

        repo.revoke(share_id).await?;
        info!(user_id, share_id, "revoked share");
        Ok(())
    }

    /// List a user's shares, newest first.
    pub async fn list(&self, user_id: i64) -> Result<Vec<Share>> {
        ShareRepository::new(self.pool).list_by_user(user_id).await
    }

    async fn check_target_owner(
        &self,
        user_id: i64,
        kind: ShareKind,
        target_id: i64,
    ) -> Result<()> {
        let table = match kind {
            ShareKind::File => "files",
            ShareKind::Folder => "folders",
        };

        let owner: Option<i64> =
            sqlx::query_scalar(&format!("SELECT user_id FROM {table} WHERE id = $1"))
                .bind(target_id)
                .fetch_optional(self.pool)
                .await
                .map_err(|e| ObsiLockError::Database(e.to_string()))?;

        match owner {
            None => Err(ObsiLockError::NotFound(kind.as_str().to_string())),
            Some(owner_id) if owner_id == user_id => Ok(()),
            Some(_) => Err(ObsiLockError::Forbidden(format!(
                "{} is owned by another user",
                kind.as_str()
            ))),
        }
    }
}
