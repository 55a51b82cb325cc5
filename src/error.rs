//! # Error Handling
//!
//! Error types for the end-to-end encryption core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Identity Errors                                                   │
//! │  │   ├── NoActiveIdentity      - No user context selected              │
//! │  │   └── IdentityNotFound      - Active user has no keypair            │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── AuthenticationFailed  - AEAD tag mismatch (tamper/wrong key)  │
//! │  │   ├── EncryptionFailed      - Encryption operation failed           │
//! │  │   ├── DecryptionFailed      - RSA unwrap failed                     │
//! │  │   ├── KeyGenerationFailed   - Keypair generation failed             │
//! │  │   ├── KeyDerivationFailed   - KDF failed or parameters too weak     │
//! │  │   └── InvalidKey            - Invalid key format/length             │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError      - Failed to read from storage           │
//! │  │   ├── StorageWriteError     - Failed to write to storage            │
//! │  │   ├── StorageCorrupted      - At-rest data failed authentication    │
//! │  │   └── DatabaseError         - SQLite error                          │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── KeyNotFound           - No session key resolvable             │
//! │  │   └── NoParticipantsReachable - Nobody received a wrapped key       │
//! │  │                                                                      │
//! │  ├── Remote Errors (recoverable)                                       │
//! │  │   ├── DirectoryLookupFailed - Public key directory unavailable      │
//! │  │   └── TransportFailed       - Key server / backup storage failed    │
//! │  │                                                                      │
//! │  └── Backup Errors                                                     │
//! │      ├── BackupNotFound        - No backup exists (expected state)     │
//! │      ├── IncorrectPin          - Backup failed to authenticate         │
//! │      ├── NothingToBackUp       - No session keys held locally          │
//! │      └── InvalidPin            - PIN rejected before derivation        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "Wrong PIN", "no backup" and "network error" are separate variants so the
//! UI can pick a different recovery action for each.

use thiserror::Error;

/// Result type alias for umbra-e2ee operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for umbra-e2ee
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// A scoped operation was called without an active identity
    #[error("No active identity. Call KeyStore::set_active_identity() first.")]
    NoActiveIdentity,

    /// The active user has no identity keypair
    #[error("No identity keypair exists for user {0}")]
    IdentityNotFound(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// AEAD authentication tag did not verify
    ///
    /// Tampered ciphertext and a wrong key are indistinguishable.
    #[error("Authentication failed: ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Asymmetric decryption (key unwrap) failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Keypair generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Key derivation failed
    #[error("Failed to derive key: {0}")]
    KeyDerivationFailed(String),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Session Errors (500-599)
    // ========================================================================

    /// No session key could be resolved for the conversation
    #[error("No session key available for conversation {0}")]
    KeyNotFound(String),

    /// Not a single participant could receive a wrapped key
    #[error("No participant of conversation {0} has a usable public key")]
    NoParticipantsReachable(String),

    // ========================================================================
    // Remote Errors (600-699)
    // ========================================================================

    /// The public key directory could not be queried
    #[error("Directory lookup failed: {0}")]
    DirectoryLookupFailed(String),

    /// The key server or backup storage could not be reached
    #[error("Transport error: {0}")]
    TransportFailed(String),

    // ========================================================================
    // Backup Errors (700-799)
    // ========================================================================

    /// No backup exists for this account
    #[error("No backup exists for this account.")]
    BackupNotFound,

    /// The PIN did not decrypt the backup
    #[error("Incorrect PIN.")]
    IncorrectPin,

    /// There are no session keys to back up
    #[error("Nothing to back up: no conversation keys are stored on this device.")]
    NothingToBackUp,

    /// The PIN was rejected before key derivation
    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Session
    /// - 600-699: Remote
    /// - 700-799: Backup
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Identity (200-299)
            Error::NoActiveIdentity => 200,
            Error::IdentityNotFound(_) => 201,

            // Crypto (300-399)
            Error::AuthenticationFailed => 300,
            Error::EncryptionFailed(_) => 301,
            Error::DecryptionFailed(_) => 302,
            Error::KeyGenerationFailed(_) => 303,
            Error::KeyDerivationFailed(_) => 304,
            Error::InvalidKey(_) => 305,

            // Storage (400-499)
            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,
            Error::StorageCorrupted(_) => 402,
            Error::DatabaseError(_) => 403,

            // Session (500-599)
            Error::KeyNotFound(_) => 500,
            Error::NoParticipantsReachable(_) => 501,

            // Remote (600-699)
            Error::DirectoryLookupFailed(_) => 600,
            Error::TransportFailed(_) => 601,

            // Backup (700-799)
            Error::BackupNotFound => 700,
            Error::IncorrectPin => 701,
            Error::NothingToBackUp => 702,
            Error::InvalidPin(_) => 703,

            // Internal (900-999)
            Error::InvalidConfig(_) => 900,
            Error::Internal(_) => 901,
            Error::SerializationError(_) => 902,
            Error::DeserializationError(_) => 903,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by the caller retrying later.
    /// Nothing inside this crate retries on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DirectoryLookupFailed(_) | Error::TransportFailed(_)
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::IncorrectPin | Error::InvalidPin(_) | Error::NothingToBackUp
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DeserializationError(format!("Invalid base64: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================
