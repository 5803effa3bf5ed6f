//! ObsiLock - encrypted file storage core.
//!
//! Server-side encrypted, versioned object storage with per-user quota
//! accounting and signed share capabilities. This crate is the storage core
//! only; HTTP surface, authentication and session handling live in the
//! embedding application.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;
pub mod share;

pub use auth::{require_owner, Owned};
pub use config::Config;
pub use crypto::{ContentKey, KeyEnvelope, MasterKey, TokenSigner};
pub use db::{Database, DbPool, NewUser, QuotaUsage, User, UserRepository};
pub use error::{ObsiLockError, Result};
pub use file::{
    BlobStorage, DownloadResult, FileMetadata, FileService, FileVersion, StoredObject,
    UploadOptions,
};
pub use share::{Redemption, Share, ShareKind, ShareOptions, ShareService, ShareValidity};
