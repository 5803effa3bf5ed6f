//! Share capabilities: signed bearer tokens over files and folders.
//!
//! A share grants access to a target by possession of its token alone. The
//! token carries an HMAC signature so forged or mutated tokens are rejected
//! before any database lookup result is trusted. Shares are never physically
//! deleted; revocation and use decrements are the only mutations.

mod repository;
mod service;

pub use repository::{NewShare, Share, ShareRepository};
pub use service::{Redemption, ShareOptions, ShareService};

use crate::{ObsiLockError, Result};

/// What a share points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    /// A single file.
    File,
    /// A folder.
    Folder,
}

impl ShareKind {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareKind::File => "file",
            ShareKind::Folder => "folder",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(ShareKind::File),
            "folder" => Ok(ShareKind::Folder),
            other => Err(ObsiLockError::Validation(format!(
                "unknown share kind: {other}"
            ))),
        }
    }
}

/// Validity of a share at a point in time.
///
/// Exactly one state holds; the checks apply in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareValidity {
    /// The share can be redeemed.
    Valid,
    /// The owner revoked the share.
    Revoked,
    /// The expiry timestamp has passed.
    Expired,
    /// A limited-use share has no uses left.
    NoUsesLeft,
}

impl ShareValidity {
    /// True when the share can be redeemed.
    pub fn is_valid(&self) -> bool {
        matches!(self, ShareValidity::Valid)
    }

    /// Denial reason string, `None` when valid.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            ShareValidity::Valid => None,
            ShareValidity::Revoked => Some("revoked"),
            ShareValidity::Expired => Some("expired"),
            ShareValidity::NoUsesLeft => Some("no_uses_left"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_kind_roundtrip() {
        assert_eq!(ShareKind::parse("file").unwrap(), ShareKind::File);
        assert_eq!(ShareKind::parse("folder").unwrap(), ShareKind::Folder);
        assert_eq!(ShareKind::File.as_str(), "file");
        assert_eq!(ShareKind::Folder.as_str(), "folder");
        assert!(ShareKind::parse("link").is_err());
    }

    #[test]
    fn test_validity_reasons() {
        assert!(ShareValidity::Valid.is_valid());
        assert_eq!(ShareValidity::Valid.reason(), None);
        assert_eq!(ShareValidity::Revoked.reason(), Some("revoked"));
        assert_eq!(ShareValidity::Expired.reason(), Some("expired"));
        assert_eq!(ShareValidity::NoUsesLeft.reason(), Some("no_uses_left"));
    }
}
