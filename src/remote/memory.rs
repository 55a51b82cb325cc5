//! In-memory implementations of the remote collaborators.
//!
//! Used by tests and the demo. Each service has an offline switch so callers
//! can exercise the transport failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    BackupMetadata, BackupStorage, DirectoryEntry, DirectoryService, KeyDistribution,
    WrappedSessionKey,
};
use crate::backup::BackupBlob;
use crate::crypto::IdentityPublicKey;
use crate::error::{Error, Result};

// ============================================================================
// DIRECTORY
// ============================================================================

/// Public key directory held in memory
#[derive(Default)]
pub struct InMemoryDirectory {
    keys: RwLock<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a user's public key
    pub fn register(&self, user_id: &str, public_key: &IdentityPublicKey) -> Result<()> {
        self.register_raw(user_id, public_key.to_der()?);
        Ok(())
    }

    /// Register arbitrary bytes as a user's key
    pub fn register_raw(&self, user_id: &str, der: Vec<u8>) {
        self.keys.write().insert(user_id.to_string(), der);
        tracing::debug!("Directory: registered key for {}", user_id);
    }

    /// Remove a user's key
    pub fn unregister(&self, user_id: &str) -> bool {
        self.keys.write().remove(user_id).is_some()
    }

    /// Make every lookup fail
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn public_keys(&self, user_ids: &[String]) -> Result<Vec<DirectoryEntry>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::DirectoryLookupFailed("directory is offline".into()));
        }

        let keys = self.keys.read();
        Ok(user_ids
            .iter()
            .map(|id| DirectoryEntry {
                user_id: id.clone(),
                public_key: keys.get(id).cloned(),
            })
            .collect())
    }
}

// ============================================================================
// KEY SERVER
// ============================================================================

/// Wrapped key server shared by all clients
#[derive(Default)]
pub struct InMemoryKeyServer {
    /// (conversation id, recipient) → wrapped key
    keys: RwLock<HashMap<(String, String), Vec<u8>>>,
    rejected: RwLock<HashSet<String>>,
    offline: AtomicBool,
}

impl InMemoryKeyServer {
    /// Create an empty server
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A client authenticated as `user_id`
    pub fn client(self: &Arc<Self>, user_id: &str) -> InMemoryKeyClient {
        InMemoryKeyClient {
            server: self.clone(),
            user_id: user_id.to_string(),
        }
    }

    /// Make every call fail
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail publishes for one conversation only
    pub fn reject_conversation(&self, conversation_id: &str) {
        self.rejected.write().insert(conversation_id.to_string());
    }

    /// Wrapped key stored for a recipient
    pub fn wrapped_key(&self, conversation_id: &str, recipient: &str) -> Option<Vec<u8>> {
        self.keys
            .read()
            .get(&(conversation_id.to_string(), recipient.to_string()))
            .cloned()
    }

    /// Recipients holding a key for a conversation
    pub fn recipients(&self, conversation_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .keys
            .read()
            .keys()
            .filter(|(c, _)| c == conversation_id)
            .map(|(_, u)| u.clone())
            .collect();
        users.sort();
        users
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::TransportFailed("key server is offline".into()));
        }
        Ok(())
    }
}

/// Per-user handle to an [`InMemoryKeyServer`]
#[derive(Clone)]
pub struct InMemoryKeyClient {
    server: Arc<InMemoryKeyServer>,
    user_id: String,
}

#[async_trait]
impl KeyDistribution for InMemoryKeyClient {
    async fn publish_wrapped_keys(
        &self,
        conversation_id: &str,
        keys: &[WrappedSessionKey],
    ) -> Result<()> {
        self.server.check_online()?;
        if self.server.rejected.read().contains(conversation_id) {
            return Err(Error::TransportFailed(format!(
                "publish rejected for {}",
                conversation_id
            )));
        }

        let mut stored = self.server.keys.write();
        for key in keys {
            stored.insert(
                (conversation_id.to_string(), key.recipient_user_id.clone()),
                key.ciphertext.clone(),
            );
        }
        tracing::debug!(
            "Key server: {} published {} keys for {}",
            self.user_id,
            keys.len(),
            conversation_id
        );
        Ok(())
    }

    async fn fetch_my_wrapped_key(&self, conversation_id: &str) -> Result<Option<Vec<u8>>> {
        self.server.check_online()?;
        Ok(self.server.wrapped_key(conversation_id, &self.user_id))
    }
}

// ============================================================================
// BACKUP STORAGE
// ============================================================================

/// Backup storage for a single account
#[derive(Default)]
pub struct InMemoryBackupStorage {
    blob: RwLock<Option<(BackupBlob, i64)>>,
    offline: AtomicBool,
}

impl InMemoryBackupStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::TransportFailed("backup storage is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStorage for InMemoryBackupStorage {
    async fn upload_backup(&self, blob: &BackupBlob) -> Result<()> {
        self.check_online()?;
        *self.blob.write() = Some((blob.clone(), crate::time::now_timestamp()));
        Ok(())
    }

    async fn download_backup(&self) -> Result<Option<BackupBlob>> {
        self.check_online()?;
        Ok(self.blob.read().as_ref().map(|(b, _)| b.clone()))
    }

    async fn backup_exists(&self) -> Result<bool> {
        self.check_online()?;
        Ok(self.blob.read().is_some())
    }

    async fn backup_metadata(&self) -> Result<Option<BackupMetadata>> {
        self.check_online()?;
        Ok(self.blob.read().as_ref().map(|(b, at)| BackupMetadata {
            conversation_count: b.conversation_ids.len(),
            updated_at: *at,
        }))
    }

    async fn delete_backup(&self) -> Result<bool> {
        self.check_online()?;
        Ok(self.blob.write().take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_lookup() {
        let dir = InMemoryDirectory::new();
        dir.register_raw("alice", vec![1, 2, 3]);

        let entries = dir
            .public_keys(&["alice".to_string(), "bob".to_string()])
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].public_key, Some(vec![1, 2, 3]));
        assert_eq!(entries[1].public_key, None);

        dir.set_offline(true);
        let err = dir.public_keys(&["alice".to_string()]).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_key_server_scopes_fetch_to_caller() {
        let server = InMemoryKeyServer::new();
        let alice = server.client("alice");
        let bob = server.client("bob");

        let keys = vec![
            WrappedSessionKey {
                conversation_id: "c".into(),
                recipient_user_id: "alice".into(),
                ciphertext: vec![1],
            },
            WrappedSessionKey {
                conversation_id: "c".into(),
                recipient_user_id: "bob".into(),
                ciphertext: vec![2],
            },
        ];
        alice.publish_wrapped_keys("c", &keys).await.unwrap();

        assert_eq!(alice.fetch_my_wrapped_key("c").await.unwrap(), Some(vec![1]));
        assert_eq!(bob.fetch_my_wrapped_key("c").await.unwrap(), Some(vec![2]));
        assert_eq!(bob.fetch_my_wrapped_key("other").await.unwrap(), None);
        assert_eq!(server.recipients("c"), vec!["alice", "bob"]);

        server.reject_conversation("c");
        assert!(alice.publish_wrapped_keys("c", &keys).await.is_err());
        assert!(alice.fetch_my_wrapped_key("c").await.is_ok());

        server.set_offline(true);
        assert!(matches!(
            bob.fetch_my_wrapped_key("c").await,
            Err(Error::TransportFailed(_))
        ));
    }
}
