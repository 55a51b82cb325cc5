//! # Storage Module
//!
//! Encrypted local persistence for key material.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  IdentityKeyContainer                                           │   │
//! │  │  ────────────────────                                            │   │
//! │  │  Identity keypairs. Hands out PrivateKeyHandle capabilities.    │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │ (software container)                 │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStore                                                    │   │
//! │  │  ───────────                                                     │   │
//! │  │  AES-256-GCM per record, record name as AAD                     │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │                                       │
//! │                                 ▼                                       │
//! │  ┌──────────────────────┐   ┌──────────────────────┐                   │
//! │  │  MemoryBackend       │   │  SqliteBackend       │                   │
//! │  │  (tests, ephemeral)  │   │  (durable file)      │                   │
//! │  └──────────────────────┘   └──────────────────────┘                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
mod key_container;
mod schema;
mod secure_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use database::SqliteBackend;
pub use key_container::{IdentityKeyContainer, PrivateKeyHandle, SoftwareKeyContainer};
pub use secure_store::{keys, SecureStore};

use crate::error::Result;

/// Raw key-value persistence
///
/// Backends store opaque bytes. Encryption happens in [`SecureStore`] before
/// anything reaches a backend.
pub trait StorageBackend: Send + Sync {
    /// Insert or replace a value
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a value, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    items: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.items.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.items.write().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .items
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Open the backend for `path` (SQLite) or an in-memory one
pub fn open_backend(path: Option<&str>) -> Result<Arc<dyn StorageBackend>> {
    match path {
        Some(p) => {
            tracing::info!("Opening key database at {}", p);
            Ok(Arc::new(SqliteBackend::open(Some(p))?))
        }
        None => {
            tracing::debug!("Using in-memory key storage");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
