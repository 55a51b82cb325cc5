//! # Secure Storage
//!
//! Encrypted-at-rest key-value store used for session keys, wrapped keys and
//! software identity keys.
//!
//! ## Record Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ENCRYPTED RECORD                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┬──────────────────────────────┬──────────────────┐    │
//! │  │ nonce (12 B) │ AES-256-GCM ciphertext       │ tag (16 B)       │    │
//! │  └──────────────┴──────────────────────────────┴──────────────────┘    │
//! │                                                                         │
//! │  AAD = the record's key name                                            │
//! │                                                                         │
//! │  Binding the name as AAD means a record copied under another name      │
//! │  (another user or conversation) fails to authenticate.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use zeroize::Zeroizing;

use super::StorageBackend;
use crate::crypto::{decrypt, encrypt, EncryptionKey, Nonce, NONCE_SIZE};
use crate::error::{Error, Result};

/// Key name prefixes for secure storage
pub mod keys {
    /// Decrypted session keys, per user and conversation
    pub const SESSION_PREFIX: &str = "umbra.session";

    /// Wrapped (RSA-encrypted) session keys, per user and conversation
    pub const WRAPPED_PREFIX: &str = "umbra.wrapped";

    /// Software identity keypairs, per alias
    pub const IDENTITY_PREFIX: &str = "umbra.identity";
}

/// Encrypting wrapper around a [`StorageBackend`]
#[derive(Clone)]
pub struct SecureStore {
    backend: Arc<dyn StorageBackend>,
    encryption_key: Arc<EncryptionKey>,
}

impl SecureStore {
    /// Create a secure store over `backend`, encrypting with `key`
    pub fn new(backend: Arc<dyn StorageBackend>, key: EncryptionKey) -> Self {
        Self {
            backend,
            encryption_key: Arc::new(key),
        }
    }

    /// Store data, encrypted under the store key with `key` as AAD
    pub fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let (ciphertext, nonce) = encrypt(&self.encryption_key, value, key.as_bytes())?;

        let mut record = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        record.extend_from_slice(nonce.as_bytes());
        record.extend_from_slice(&ciphertext);

        self.backend.put(key, &record)
    }

    /// Retrieve and decrypt data
    ///
    /// ## Errors
    ///
    /// [`Error::StorageCorrupted`] if the record was modified, moved to
    /// another name, or written under a different store key.
    pub fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let record = match self.backend.get(key)? {
            Some(r) => r,
            None => return Ok(None),
        };

        if record.len() < NONCE_SIZE {
            return Err(Error::StorageCorrupted(format!("Record {} is too short", key)));
        }

        let (nonce, ciphertext) = record.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce)?;

        let plaintext = decrypt(&self.encryption_key, &nonce, ciphertext, key.as_bytes())
            .map_err(|e| match e {
                Error::AuthenticationFailed => {
                    Error::StorageCorrupted(format!("Record {} failed authentication", key))
                }
                other => other,
            })?;

        Ok(Some(Zeroizing::new(plaintext)))
    }

    /// Delete a record
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.backend.delete(key)
    }

    /// Check if a record exists
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.backend.get(key)?.is_some())
    }

    /// List record names starting with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.backend.keys_with_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn store_with(backend: Arc<dyn StorageBackend>, key: u8) -> SecureStore {
        SecureStore::new(backend, EncryptionKey::from_bytes([key; 32]))
    }

    #[test]
    fn test_store_retrieve() {
        let store = store_with(Arc::new(MemoryBackend::new()), 1);

        store.store("umbra.session.a.b", b"secret").unwrap();
        let value = store.retrieve("umbra.session.a.b").unwrap().unwrap();
        assert_eq!(value.as_slice(), b"secret");

        assert!(store.exists("umbra.session.a.b").unwrap());
        assert!(store.retrieve("missing").unwrap().is_none());

        assert!(store.delete("umbra.session.a.b").unwrap());
        assert!(!store.exists("umbra.session.a.b").unwrap());
    }

    #[test]
    fn test_backend_never_sees_plaintext() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), 1);

        store.store("k", b"plaintext marker").unwrap();
        let raw = backend.get("k").unwrap().unwrap();
        assert!(!raw
            .windows(b"plaintext marker".len())
            .any(|w| w == b"plaintext marker"));
    }

    #[test]
    fn test_tampered_record_detected() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), 1);
        store.store("k", b"value").unwrap();

        let mut raw = backend.get("k").unwrap().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        backend.put("k", &raw).unwrap();

        assert!(matches!(store.retrieve("k"), Err(Error::StorageCorrupted(_))));
    }

    #[test]
    fn test_moved_record_detected() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), 1);
        store.store("umbra.session.u1.c", b"value").unwrap();

        let raw = backend.get("umbra.session.u1.c").unwrap().unwrap();
        backend.put("umbra.session.u2.c", &raw).unwrap();

        assert!(matches!(
            store.retrieve("umbra.session.u2.c"),
            Err(Error::StorageCorrupted(_))
        ));
    }

    #[test]
    fn test_wrong_store_key_detected() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        store_with(backend.clone(), 1).store("k", b"value").unwrap();

        let other = store_with(backend, 2);
        assert!(matches!(other.retrieve("k"), Err(Error::StorageCorrupted(_))));
    }
}
