//! # Database Schema
//!
//! SQL schema for the SQLite storage backend.
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │         secure_items            │
//! ├─────────────────────────────────┤
//! │ key         TEXT PRIMARY KEY    │
//! │ value       BLOB  (nonce || ct) │
//! │ updated_at  INTEGER             │
//! └─────────────────────────────────┘
//! ```
//!
//! Values are already encrypted by [`SecureStore`](super::SecureStore) when
//! they reach this table. The backend never sees plaintext.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Encrypted key-value items
-- Keys are namespaced: umbra.<kind>.<user>[.<conversation>]
CREATE TABLE IF NOT EXISTS secure_items (
    key TEXT PRIMARY KEY NOT NULL,
    -- 12-byte nonce followed by AES-256-GCM ciphertext and tag
    value BLOB NOT NULL,
    -- Unix timestamp (seconds)
    updated_at INTEGER NOT NULL
);
"#;
