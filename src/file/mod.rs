//! Versioned encrypted file storage.
//!
//! A logical file owns one or more immutable encrypted versions, each with
//! its own content key envelope and plaintext checksum. The service module
//! orchestrates cipher, envelope, blob store and quota ledger.

mod metadata;
mod service;
mod storage;
mod version;

pub use metadata::{FileMetadata, FileRepository, NewFile};
pub use service::{DownloadResult, FileService, StoredObject, UploadOptions};
pub use storage::BlobStorage;
pub use version::{FileVersion, NewFileVersion, VersionRepository};

/// Maximum display filename length in characters.
pub const MAX_FILENAME_LENGTH: usize = 255;
