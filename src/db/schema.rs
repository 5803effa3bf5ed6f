//! Database schema and migrations for ObsiLock.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Initial schema - users table with quota accounting
    r#"
-- Users table. Password hashes are written by the external auth layer;
-- this core only reads the quota columns.
CREATE TABLE users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    email       TEXT NOT NULL UNIQUE,
    password    TEXT NOT NULL,
    quota_total INTEGER NOT NULL DEFAULT 1073741824,
    quota_used  INTEGER NOT NULL DEFAULT 0 CHECK (quota_used >= 0),
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_users_email ON users(email);
"#,
    // v2: Folders table (folder CRUD itself lives in the outer API layer)
    r#"
CREATE TABLE folders (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_folders_user_id ON folders(user_id);
"#,
    // v3: Logical files
    r#"
-- Logical files. size, checksum and current_version always describe the
-- current version; the per-version truth lives in file_versions.
CREATE TABLE files (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    folder_id       INTEGER REFERENCES folders(id) ON DELETE SET NULL,
    filename        TEXT NOT NULL,
    mime_type       TEXT,
    size            INTEGER NOT NULL,
    checksum        TEXT NOT NULL,
    current_version INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_files_user_id ON files(user_id);
CREATE INDEX idx_files_folder_id ON files(folder_id);
"#,
    // v4: File versions with per-version key material
    r#"
-- Immutable encrypted versions. stored_name is the opaque blob handle;
-- key_envelope, key_nonce and chunk_nonce_start are base64.
CREATE TABLE file_versions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id           INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    version           INTEGER NOT NULL,
    stored_name       TEXT NOT NULL,
    size              INTEGER NOT NULL,
    checksum          TEXT NOT NULL,
    mime_type         TEXT,
    key_envelope      TEXT NOT NULL,
    key_nonce         TEXT NOT NULL,
    chunk_nonce_start TEXT NOT NULL,
    created_at        TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(file_id, version)
);

CREATE INDEX idx_file_versions_file_id ON file_versions(file_id);
"#,
    // v5: Share capabilities
    r#"
-- Bearer-token share capabilities. Rows are never physically deleted;
-- revocation and use decrements are the only mutations.
CREATE TABLE shares (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind            TEXT NOT NULL,
    target_id       INTEGER NOT NULL,
    token           TEXT NOT NULL UNIQUE,
    token_signature TEXT NOT NULL,
    label           TEXT,
    expires_at      TEXT,
    max_uses        INTEGER,
    remaining_uses  INTEGER,
    is_revoked      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_shares_user_id ON shares(user_id);
CREATE INDEX idx_shares_token ON shares(token);
"#,
];
