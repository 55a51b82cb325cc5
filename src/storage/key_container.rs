//! # Identity Key Container
//!
//! Holder of identity private keys. Callers get a [`PrivateKeyHandle`] that
//! can decrypt but never exposes the key bytes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      KEY CONTAINER                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  IdentityKeyContainer trait                                             │
//! │  ──────────────────────────                                             │
//! │  • generate(alias, bits)  - create or replace a keypair                │
//! │  • public_key(alias)      - public half, if the alias exists           │
//! │  • decrypt(alias, ct)     - RSA-OAEP unwrap inside the container       │
//! │  • delete(alias)          - destroy the keypair                        │
//! │                                                                         │
//! │  ┌─────────────────────┐        ┌─────────────────────┐                 │
//! │  │ SoftwareKeyContainer│        │ Platform keystore   │                 │
//! │  │ PKCS#8 in a         │        │ (host-provided,     │                 │
//! │  │ SecureStore         │        │  non-exportable)    │                 │
//! │  └─────────────────────┘        └─────────────────────┘                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use zeroize::Zeroizing;

use super::secure_store::keys;
use super::SecureStore;
use crate::crypto::{asymmetric_decrypt, IdentityKeyPair, IdentityPublicKey};
use crate::error::{Error, Result};

/// Storage for identity keypairs that never hands out private key bytes
///
/// Hosts with a hardware keystore implement this over the platform API.
pub trait IdentityKeyContainer: Send + Sync {
    /// Generate a keypair under `alias`, replacing any existing one
    fn generate(&self, alias: &str, bits: usize) -> Result<IdentityPublicKey>;

    /// Public half of the keypair under `alias`
    fn public_key(&self, alias: &str) -> Result<Option<IdentityPublicKey>>;

    /// RSA-OAEP decrypt with the private key under `alias`
    ///
    /// [`Error::IdentityNotFound`] if the alias holds no keypair.
    fn decrypt(&self, alias: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Destroy the keypair under `alias`
    fn delete(&self, alias: &str) -> Result<bool>;

    /// Whether `alias` holds a keypair
    fn contains(&self, alias: &str) -> Result<bool> {
        Ok(self.public_key(alias)?.is_some())
    }
}

/// Capability to decrypt with one identity's private key
///
/// Cloneable and cheap. Holding a handle does not keep key bytes in memory.
#[derive(Clone)]
pub struct PrivateKeyHandle {
    alias: String,
    container: Arc<dyn IdentityKeyContainer>,
}

impl PrivateKeyHandle {
    pub(crate) fn new(alias: String, container: Arc<dyn IdentityKeyContainer>) -> Self {
        Self { alias, container }
    }

    /// Container alias this handle refers to
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Unwrap `ciphertext` with the referenced private key
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.container.decrypt(&self.alias, ciphertext)
    }
}

impl std::fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyHandle")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// Software key container persisting PKCS#8 DER in a [`SecureStore`]
pub struct SoftwareKeyContainer {
    store: SecureStore,
}

impl SoftwareKeyContainer {
    /// Create a container over `store`
    pub fn new(store: SecureStore) -> Self {
        Self { store }
    }

    fn record_name(alias: &str) -> String {
        format!("{}.{}", keys::IDENTITY_PREFIX, alias)
    }

    fn load(&self, alias: &str) -> Result<Option<IdentityKeyPair>> {
        match self.store.retrieve(&Self::record_name(alias))? {
            Some(der) => Ok(Some(IdentityKeyPair::from_pkcs8_der(&der)?)),
            None => Ok(None),
        }
    }
}

impl IdentityKeyContainer for SoftwareKeyContainer {
    fn generate(&self, alias: &str, bits: usize) -> Result<IdentityPublicKey> {
        let keypair = IdentityKeyPair::generate(bits)?;
        let der = keypair.to_pkcs8_der()?;
        self.store.store(&Self::record_name(alias), &der)?;
        Ok(keypair.public_key())
    }

    fn public_key(&self, alias: &str) -> Result<Option<IdentityPublicKey>> {
        Ok(self.load(alias)?.map(|kp| kp.public_key()))
    }

    fn decrypt(&self, alias: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let keypair = self
            .load(alias)?
            .ok_or_else(|| Error::IdentityNotFound(alias.to_string()))?;
        asymmetric_decrypt(ciphertext, &keypair).map(Zeroizing::new)
    }

    fn delete(&self, alias: &str) -> Result<bool> {
        self.store.delete(&Self::record_name(alias))
    }

    fn contains(&self, alias: &str) -> Result<bool> {
        self.store.exists(&Self::record_name(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{asymmetric_encrypt, EncryptionKey};
    use crate::storage::MemoryBackend;

    fn container() -> Arc<SoftwareKeyContainer> {
        let store = SecureStore::new(
            Arc::new(MemoryBackend::new()),
            EncryptionKey::from_bytes([5u8; 32]),
        );
        Arc::new(SoftwareKeyContainer::new(store))
    }

    #[test]
    fn test_generate_and_decrypt_through_handle() {
        let container = container();
        let public = container.generate("alice", 2048).unwrap();
        assert!(container.contains("alice").unwrap());
        assert_eq!(container.public_key("alice").unwrap().unwrap(), public);

        let wrapped = asymmetric_encrypt(b"session key", &public).unwrap();
        let handle = PrivateKeyHandle::new("alice".into(), container.clone());
        assert_eq!(handle.decrypt(&wrapped).unwrap().as_slice(), b"session key");
        assert!(!format!("{:?}", handle).contains("BEGIN"));
    }

    #[test]
    fn test_generate_replaces_existing() {
        let container = container();
        let first = container.generate("alice", 2048).unwrap();
        let wrapped = asymmetric_encrypt(b"old", &first).unwrap();

        let second = container.generate("alice", 2048).unwrap();
        assert_ne!(first, second);
        assert!(container.decrypt("alice", &wrapped).is_err());
    }

    #[test]
    fn test_missing_alias() {
        let container = container();
        assert!(container.public_key("nobody").unwrap().is_none());
        assert!(matches!(
            container.decrypt("nobody", &[0u8; 256]),
            Err(Error::IdentityNotFound(_))
        ));
        assert!(!container.delete("nobody").unwrap());
    }
}
