//! # Key Derivation Functions
//!
//! Password-based derivation for backups and HKDF derivation for the local
//! at-rest store.
//!
//! ## Key Derivation Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────────────────────┐   ┌───────────────────────────────┐ │
//! │  │     BACKUP WRAP KEY           │   │     STORAGE KEY               │ │
//! │  │                               │   │                               │ │
//! │  │  PBKDF2-HMAC-SHA256(          │   │  HKDF-SHA256(                 │ │
//! │  │    password = PIN,            │   │    ikm  = device secret,      │ │
//! │  │    salt = 16+ random bytes,   │   │    salt = scope,              │ │
//! │  │    iterations >= 100,000      │   │    info = "umbra-e2ee-        │ │
//! │  │  )                            │   │            storage-v1"        │ │
//! │  │                               │   │  )                            │ │
//! │  │  → 32-byte AES-256-GCM key    │   │  → 32-byte AES-256-GCM key    │ │
//! │  └───────────────────────────────┘   └───────────────────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! | Aspect | Design Choice |
//! |--------|---------------|
//! | Password KDF | PBKDF2-HMAC-SHA256, 100,000 iterations minimum |
//! | Salt | Fresh per backup, at least 128 bits |
//! | Work factor | Recorded in every backup blob |
//! | Storage KDF | HKDF-SHA256 with a versioned `info` string |
//!
//! PBKDF2 at these iteration counts takes tens to hundreds of milliseconds.
//! Async callers should run it on a blocking worker.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::encryption::{EncryptionKey, KEY_SIZE};
use super::{MIN_PBKDF2_ITERATIONS, MIN_SALT_LEN};
use crate::error::{Error, Result};

/// Domain separation strings for HKDF
pub mod domain {
    /// Domain for the persistent key tier's at-rest key
    pub const STORAGE_ENCRYPTION: &[u8] = b"umbra-e2ee-storage-v1";
}

/// `deriveKeyFromPassword`: PBKDF2-HMAC-SHA256 into an AES-256 key
///
/// ## Errors
///
/// [`Error::KeyDerivationFailed`] when `iterations` is below
/// [`MIN_PBKDF2_ITERATIONS`] or the salt is shorter than [`MIN_SALT_LEN`].
pub fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<EncryptionKey> {
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(Error::KeyDerivationFailed(format!(
            "PBKDF2 iteration count {} is below the minimum of {}",
            iterations, MIN_PBKDF2_ITERATIONS
        )));
    }
    if salt.len() < MIN_SALT_LEN {
        return Err(Error::KeyDerivationFailed(format!(
            "Salt of {} bytes is shorter than the minimum of {}",
            salt.len(),
            MIN_SALT_LEN
        )));
    }

    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out[..]);
    Ok(EncryptionKey::from_bytes(*out))
}

/// Generate a random salt of `len` bytes (at least [`MIN_SALT_LEN`])
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len.max(MIN_SALT_LEN)];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the at-rest key for the persistent key tier
///
/// `scope` separates independent stores derived from the same device secret.
pub fn derive_storage_key(device_secret: &[u8], scope: &[u8]) -> Result<EncryptionKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(scope), device_secret);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(domain::STORAGE_ENCRYPTION, &mut key[..])
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive storage key".into()))?;

    Ok(EncryptionKey::from_bytes(*key))
}

/// Short SHA-256 fingerprint of key material, safe for logs
pub fn key_fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}

// ============================================================================
// TESTS
// ============================================================================
