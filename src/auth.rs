//! Ownership checks for ObsiLock resources.
//!
//! Every core operation that takes `(user_id, resource)` goes through the
//! same predicate, so ownership rules cannot drift between call sites.

use crate::{ObsiLockError, Result};

/// A resource exclusively owned by one user.
pub trait Owned {
    /// The owning user's ID.
    fn owner_id(&self) -> i64;
}

/// Require that `user_id` owns the resource.
///
/// `what` names the resource in the error message.
pub fn require_owner<T: Owned>(resource: &T, user_id: i64, what: &str) -> Result<()> {
    if resource.owner_id() == user_id {
        Ok(())
    } else {
        Err(ObsiLockError::Forbidden(format!(
            "{what} is owned by another user"
        )))
    }
}
