//! # Backup & Restore
//!
//! PIN-protected export of every conversation key, so a user's history stays
//! readable after moving to a new device.
//!
//! ## Backup Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CREATE BACKUP                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Collecting   KeyStore::all_session_keys()  (none → NothingToBackUp)   │
//! │      │        { conversationId: base64(key), ... } as JSON              │
//! │      ▼                                                                  │
//! │  Deriving     PBKDF2-HMAC-SHA256(PIN, fresh salt, iterations)          │
//! │      │        on a blocking worker                                      │
//! │      ▼                                                                  │
//! │  Encrypting   AES-256-GCM(derived key, fresh IV, JSON)                  │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  Done         BackupBlob { ciphertext, salt, iv, conversation_ids, … } │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Restore Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RESTORE BACKUP                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Collecting   BackupStorage::download_backup()  (none → BackupNotFound)│
//! │      ▼                                                                  │
//! │  Deriving     PBKDF2 with the blob's salt and iteration count          │
//! │      ▼                                                                  │
//! │  Decrypting   AES-256-GCM   (tag mismatch → IncorrectPin)               │
//! │      ▼                                                                  │
//! │  For each (conversationId, key):                                        │
//! │      store locally ──► re-wrap under current public key ──► publish    │
//! │      (publish failure is reported, the local key is kept)              │
//! │      ▼                                                                  │
//! │  Done         RestoreReport                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The conversation id list travels in cleartext next to the ciphertext so
//! the server can report a count without the PIN. Conversation ids are
//! therefore visible to the backup storage operator.
//!
//! PIN attempt throttling is left to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{
    asymmetric_encrypt, authenticated_decrypt, authenticated_encrypt, decode_session_key,
    derive_key_from_password, generate_salt, EncryptionKey, Nonce, MAX_PBKDF2_ITERATIONS,
    MIN_PBKDF2_ITERATIONS,
};
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::remote::{base64_bytes, BackupStorage, KeyDistribution, WrappedSessionKey};

/// Current backup blob format
pub const BACKUP_VERSION: u32 = 1;

fn default_iterations() -> u32 {
    MIN_PBKDF2_ITERATIONS
}

/// An encrypted backup of all conversation keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupBlob {
    /// Format version
    #[serde(default = "BackupBlob::default_version")]
    pub version: u32,
    /// AES-256-GCM ciphertext of the key map
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// PBKDF2 salt
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// AES-GCM IV
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Conversations in the backup (not encrypted)
    pub conversation_ids: Vec<String>,
    /// PBKDF2 iteration count used for this blob
    #[serde(default = "default_iterations")]
    pub kdf_iterations: u32,
    /// Unix timestamp (seconds) of creation
    #[serde(default)]
    pub created_at: i64,
}

impl BackupBlob {
    fn default_version() -> u32 {
        BACKUP_VERSION
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

/// Summary of the stored backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Number of conversation keys in the backup
    pub conversation_count: usize,
    /// When the backup was last uploaded
    pub last_updated: DateTime<Utc>,
}

/// What a restore did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Conversations whose key is now stored locally
    pub restored: Vec<String>,
    /// Restored conversations whose re-wrapped key could not be published
    pub republish_failed: Vec<String>,
    /// Entries in the backup that could not be decoded
    pub skipped: Vec<String>,
}

// ============================================================================
// PHASES
// ============================================================================

/// Stage of a single backup or restore operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    /// Nothing started
    Idle,
    /// Gathering keys (backup) or downloading the blob (restore)
    Collecting,
    /// Running PBKDF2
    Deriving,
    /// Encrypting the key map
    Encrypting,
    /// Decrypting the key map
    Decrypting,
    /// Finished successfully
    Done,
    /// Aborted with an error
    Failed,
}

impl BackupPhase {
    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: BackupPhase) -> bool {
        use BackupPhase::*;
        matches!(
            (self, next),
            (Idle, Collecting)
                | (Collecting, Deriving)
                | (Deriving, Encrypting)
                | (Deriving, Decrypting)
                | (Encrypting, Done)
                | (Decrypting, Done)
                | (Idle | Collecting | Deriving | Encrypting | Decrypting, Failed)
        )
    }

    /// Whether the operation has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, BackupPhase::Done | BackupPhase::Failed)
    }
}

/// Phase tracker for one operation
struct PhaseTracker {
    operation: &'static str,
    phase: BackupPhase,
}

impl PhaseTracker {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            phase: BackupPhase::Idle,
        }
    }

    fn advance(&mut self, next: BackupPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "{}: invalid transition {:?} -> {:?}",
                self.operation, self.phase, next
            )));
        }
        tracing::debug!("{}: {:?} -> {:?}", self.operation, self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Record the outcome of `result`, moving to Failed on error
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && !self.phase.is_terminal() {
            tracing::debug!("{}: {:?} -> Failed", self.operation, self.phase);
            self.phase = BackupPhase::Failed;
        }
        result
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Creates, uploads and restores key backups
pub struct BackupManager {
    keystore: Arc<KeyStore>,
    storage: Arc<dyn BackupStorage>,
    distribution: Arc<dyn KeyDistribution>,
    pbkdf2_iterations: u32,
    salt_len: usize,
}

impl BackupManager {
    /// Create a manager
    ///
    /// `distribution` is used to re-publish restored keys.
    pub fn new(
        keystore: Arc<KeyStore>,
        storage: Arc<dyn BackupStorage>,
        distribution: Arc<dyn KeyDistribution>,
        pbkdf2_iterations: u32,
        salt_len: usize,
    ) -> Self {
        Self {
            keystore,
            storage,
            distribution,
            pbkdf2_iterations,
            salt_len,
        }
    }

    fn check_pin(pin: &str) -> Result<()> {
        if pin.is_empty() {
            return Err(Error::InvalidPin("PIN must not be empty".into()));
        }
        Ok(())
    }

    async fn derive_on_worker(pin: &str, salt: Vec<u8>, iterations: u32) -> Result<EncryptionKey> {
        let pin = Zeroizing::new(pin.as_bytes().to_vec());
        tokio::task::spawn_blocking(move || derive_key_from_password(&pin, &salt, iterations))
            .await
            .map_err(|e| Error::Internal(format!("Key derivation worker failed: {}", e)))?
    }

    /// Encrypt every session key of the active user under `pin`
    ///
    /// No network I/O happens here; see [`upload_backup`](Self::upload_backup).
    pub async fn create_backup(&self, pin: &str) -> Result<BackupBlob> {
        let mut phases = PhaseTracker::new("create_backup");
        let result = self.create_backup_inner(pin, &mut phases).await;
        phases.track(result)
    }

    async fn create_backup_inner(
        &self,
        pin: &str,
        phases: &mut PhaseTracker,
    ) -> Result<BackupBlob> {
        Self::check_pin(pin)?;

        phases.advance(BackupPhase::Collecting)?;
        let keys = self.keystore.all_session_keys()?;
        if keys.is_empty() {
            return Err(Error::NothingToBackUp);
        }

        let conversation_ids: Vec<String> = keys.iter().map(|(c, _)| c.clone()).collect();
        let map: BTreeMap<&str, Zeroizing<String>> = keys
            .iter()
            .map(|(c, k)| (c.as_str(), Zeroizing::new(STANDARD.encode(k.as_bytes()))))
            .collect();
        let plaintext = Zeroizing::new(serde_json::to_vec(&map)?);

        phases.advance(BackupPhase::Deriving)?;
        let salt = generate_salt(self.salt_len);
        let wrap_key = Self::derive_on_worker(pin, salt.clone(), self.pbkdf2_iterations).await?;

        phases.advance(BackupPhase::Encrypting)?;
        let (ciphertext, nonce) = authenticated_encrypt(&plaintext, &wrap_key)?;

        phases.advance(BackupPhase::Done)?;
        tracing::info!("Created backup of {} conversation keys", conversation_ids.len());

        Ok(BackupBlob {
            version: BACKUP_VERSION,
            ciphertext,
            salt,
            iv: nonce.as_bytes().to_vec(),
            conversation_ids,
            kdf_iterations: self.pbkdf2_iterations,
            created_at: crate::time::now_timestamp(),
        })
    }

    /// Upload a blob, replacing the stored backup
    pub async fn upload_backup(&self, blob: &BackupBlob) -> Result<()> {
        self.storage.upload_backup(blob).await?;
        tracing::info!(
            "Uploaded backup ({} conversations)",
            blob.conversation_ids.len()
        );
        Ok(())
    }

    /// [`create_backup`](Self::create_backup) followed by an upload
    pub async fn create_and_upload_backup(&self, pin: &str) -> Result<BackupBlob> {
        let blob = self.create_backup(pin).await?;
        self.upload_backup(&blob).await?;
        Ok(blob)
    }

    /// Download the backup and restore its keys into the active user's store
    ///
    /// Restored keys are re-wrapped under the current identity and published
    /// so other devices and the key server agree with this one.
    ///
    /// ## Errors
    ///
    /// - [`Error::BackupNotFound`] if there is no backup (an expected state)
    /// - [`Error::IncorrectPin`] if the PIN does not decrypt the backup
    /// - [`Error::TransportFailed`] if the backup could not be downloaded
    /// - [`Error::DeserializationError`] for an unsupported version or an
    ///   iteration count above [`MAX_PBKDF2_ITERATIONS`]
    pub async fn restore_backup(&self, pin: &str) -> Result<RestoreReport> {
        let mut phases = PhaseTracker::new("restore_backup");
        let result = self.restore_backup_inner(pin, &mut phases).await;
        phases.track(result)
    }

    async fn restore_backup_inner(
        &self,
        pin: &str,
        phases: &mut PhaseTracker,
    ) -> Result<RestoreReport> {
        Self::check_pin(pin)?;
        let user = self
            .keystore
            .active_identity()
            .ok_or(Error::NoActiveIdentity)?;
        let public_key = self
            .keystore
            .public_key()?
            .ok_or_else(|| Error::IdentityNotFound(user.clone()))?;

        phases.advance(BackupPhase::Collecting)?;
        let blob = self
            .storage
            .download_backup()
            .await?
            .ok_or(Error::BackupNotFound)?;
        if blob.version > BACKUP_VERSION {
            return Err(Error::DeserializationError(format!(
                "Backup version {} is not supported",
                blob.version
            )));
        }
        if blob.kdf_iterations > MAX_PBKDF2_ITERATIONS {
            return Err(Error::DeserializationError(format!(
                "Backup iteration count {} exceeds the maximum of {}",
                blob.kdf_iterations, MAX_PBKDF2_ITERATIONS
            )));
        }

        phases.advance(BackupPhase::Deriving)?;
        let wrap_key = Self::derive_on_worker(pin, blob.salt.clone(), blob.kdf_iterations).await?;

        phases.advance(BackupPhase::Decrypting)?;
        let nonce = Nonce::from_slice(&blob.iv)
            .map_err(|_| Error::DeserializationError("Backup IV has the wrong length".into()))?;
        let plaintext = authenticated_decrypt(&blob.ciphertext, &nonce, &wrap_key)
            .map(Zeroizing::new)
            .map_err(|e| match e {
                Error::AuthenticationFailed => Error::IncorrectPin,
                other => other,
            })?;
        let map: BTreeMap<String, Zeroizing<String>> = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::DeserializationError(format!("Backup payload: {}", e)))?;

        let mut report = RestoreReport::default();
        let mut wrapped = Vec::with_capacity(map.len());

        for (conversation_id, encoded) in &map {
            let key = match STANDARD
                .decode(encoded.as_bytes())
                .map(Zeroizing::new)
                .map_err(Error::from)
                .and_then(|raw| decode_session_key(&raw))
            {
                Ok(k) => k,
                Err(e) => {
                    tracing::warn!("Skipping backup entry {}: {}", conversation_id, e);
                    report.skipped.push(conversation_id.clone());
                    continue;
                }
            };

            self.keystore.store_session_key(conversation_id, &key)?;
            report.restored.push(conversation_id.clone());

            match asymmetric_encrypt(key.as_bytes(), &public_key) {
                Ok(ciphertext) => wrapped.push(WrappedSessionKey {
                    conversation_id: conversation_id.clone(),
                    recipient_user_id: user.clone(),
                    ciphertext,
                }),
                Err(e) => {
                    tracing::warn!("Re-wrapping {} failed: {}", conversation_id, e);
                    report.republish_failed.push(conversation_id.clone());
                }
            }
        }

        let publishes = wrapped.iter().map(|w| async move {
            let result = self
                .distribution
                .publish_wrapped_keys(&w.conversation_id, std::slice::from_ref(w))
                .await;
            (w.conversation_id.clone(), result)
        });
        for (conversation_id, result) in futures::future::join_all(publishes).await {
            if let Err(e) = result {
                tracing::warn!("Re-publishing {} failed: {}", conversation_id, e);
                report.republish_failed.push(conversation_id);
            }
        }
        report.republish_failed.sort();

        phases.advance(BackupPhase::Done)?;
        tracing::info!(
            "Restored {} conversation keys ({} not re-published, {} skipped)",
            report.restored.len(),
            report.republish_failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Whether a backup exists
    pub async fn has_backup(&self) -> Result<bool> {
        self.storage.backup_exists().await
    }

    /// Summary of the stored backup, `None` if there is none
    pub async fn backup_info(&self) -> Result<Option<BackupInfo>> {
        let metadata = match self.storage.backup_metadata().await? {
            Some(m) => m,
            None => return Ok(None),
        };
        let last_updated = DateTime::<Utc>::from_timestamp(metadata.updated_at, 0).ok_or_else(
            || Error::DeserializationError(format!("Bad timestamp {}", metadata.updated_at)),
        )?;

        Ok(Some(BackupInfo {
            conversation_count: metadata.conversation_count,
            last_updated,
        }))
    }

    /// Delete the stored backup
    pub async fn delete_backup(&self) -> Result<bool> {
        let deleted = self.storage.delete_backup().await?;
        if deleted {
            tracing::info!("Deleted remote backup");
        }
        Ok(deleted)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SessionKey;
    use crate::remote::memory::{InMemoryBackupStorage, InMemoryKeyServer};
    use crate::storage::{MemoryBackend, SecureStore, SoftwareKeyContainer};

    struct Device {
        keystore: Arc<KeyStore>,
        backup: BackupManager,
    }

    fn device(
        user: &str,
        server: &Arc<InMemoryKeyServer>,
        storage: &Arc<InMemoryBackupStorage>,
    ) -> Device {
        let store = SecureStore::new(
            Arc::new(MemoryBackend::new()),
            EncryptionKey::from_bytes([4u8; 32]),
        );
        let container = Arc::new(SoftwareKeyContainer::new(store.clone()));
        let keystore = Arc::new(KeyStore::new(store, container, 2048));
        keystore.set_active_identity(Some(user));
        keystore.generate_and_store_identity_key_pair().unwrap();

        let backup = BackupManager::new(
            keystore.clone(),
            storage.clone(),
            Arc::new(server.client(user)),
            MIN_PBKDF2_ITERATIONS,
            16,
        );
        Device { keystore, backup }
    }

    fn setup() -> (Arc<InMemoryKeyServer>, Arc<InMemoryBackupStorage>) {
        (InMemoryKeyServer::new(), Arc::new(InMemoryBackupStorage::new()))
    }

    #[tokio::test]
    async fn test_backup_restore_onto_fresh_device() {
        let (server, storage) = setup();
        let old = device("alice", &server, &storage);
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();
        old.keystore.store_session_key("conv-1", &k1).unwrap();
        old.keystore.store_session_key("conv-2", &k2).unwrap();

        let blob = old.backup.create_and_upload_backup("4821").await.unwrap();
        assert_eq!(blob.conversation_ids, vec!["conv-1", "conv-2"]);
        assert_eq!(blob.salt.len(), 16);
        assert_eq!(blob.iv.len(), 12);
        assert_eq!(blob.kdf_iterations, MIN_PBKDF2_ITERATIONS);

        let new = device("alice", &server, &storage);
        let report = new.backup.restore_backup("4821").await.unwrap();
        assert_eq!(report.restored, vec!["conv-1", "conv-2"]);
        assert!(report.republish_failed.is_empty());
        assert!(report.skipped.is_empty());

        assert_eq!(new.keystore.session_key("conv-1").unwrap().unwrap(), k1);
        assert_eq!(new.keystore.session_key("conv-2").unwrap().unwrap(), k2);

        // The server copy is wrapped for the new identity
        let wrapped = server.wrapped_key("conv-1", "alice").unwrap();
        let handle = new.keystore.private_key_handle().unwrap().unwrap();
        assert_eq!(handle.decrypt(&wrapped).unwrap().as_slice(), k1.as_bytes());
    }

    #[tokio::test]
    async fn test_wrong_pin() {
        let (server, storage) = setup();
        let old = device("alice", &server, &storage);
        old.keystore
            .store_session_key("conv-1", &SessionKey::generate())
            .unwrap();
        old.backup.create_and_upload_backup("1111").await.unwrap();

        let new = device("alice", &server, &storage);
        let err = new.backup.restore_backup("2222").await.unwrap_err();
        assert!(matches!(err, Error::IncorrectPin));
        assert!(new.keystore.all_session_keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_error_kinds_are_distinct() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);

        let err = dev.backup.restore_backup("1234").await.unwrap_err();
        assert!(matches!(err, Error::BackupNotFound));

        storage.set_offline(true);
        let err = dev.backup.restore_backup("1234").await.unwrap_err();
        assert!(matches!(err, Error::TransportFailed(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_nothing_to_back_up() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        let err = dev.backup.create_backup("1234").await.unwrap_err();
        assert!(matches!(err, Error::NothingToBackUp));
    }

    #[tokio::test]
    async fn test_empty_pin_rejected() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        dev.keystore
            .store_session_key("c", &SessionKey::generate())
            .unwrap();

        assert!(matches!(
            dev.backup.create_backup("").await,
            Err(Error::InvalidPin(_))
        ));
        assert!(matches!(
            dev.backup.restore_backup("").await,
            Err(Error::InvalidPin(_))
        ));
    }

    #[tokio::test]
    async fn test_republish_failure_keeps_local_key() {
        let (server, storage) = setup();
        let old = device("alice", &server, &storage);
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();
        old.keystore.store_session_key("conv-1", &k1).unwrap();
        old.keystore.store_session_key("conv-2", &k2).unwrap();
        old.backup.create_and_upload_backup("9999").await.unwrap();

        server.reject_conversation("conv-2");
        let new = device("alice", &server, &storage);
        let report = new.backup.restore_backup("9999").await.unwrap();

        assert_eq!(report.restored, vec!["conv-1", "conv-2"]);
        assert_eq!(report.republish_failed, vec!["conv-2"]);
        assert_eq!(new.keystore.session_key("conv-2").unwrap().unwrap(), k2);
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        let good = SessionKey::generate();

        let payload = serde_json::json!({
            "good": STANDARD.encode(good.as_bytes()),
            "short": STANDARD.encode([1u8; 5]),
            "garbage": "!!!",
        });
        let salt = generate_salt(16);
        let key = derive_key_from_password(b"1234", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        let (ciphertext, nonce) =
            authenticated_encrypt(payload.to_string().as_bytes(), &key).unwrap();
        storage
            .upload_backup(&BackupBlob {
                version: BACKUP_VERSION,
                ciphertext,
                salt,
                iv: nonce.as_bytes().to_vec(),
                conversation_ids: vec!["good".into(), "short".into(), "garbage".into()],
                kdf_iterations: MIN_PBKDF2_ITERATIONS,
                created_at: 0,
            })
            .await
            .unwrap();

        let report = dev.backup.restore_backup("1234").await.unwrap();
        assert_eq!(report.restored, vec!["good"]);
        assert_eq!(report.skipped, vec!["garbage", "short"]);
        assert_eq!(dev.keystore.session_key("good").unwrap().unwrap(), good);
    }

    #[tokio::test]
    async fn test_fresh_salt_and_iv_per_backup() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        dev.keystore
            .store_session_key("c", &SessionKey::generate())
            .unwrap();

        let first = dev.backup.create_backup("1234").await.unwrap();
        let second = dev.backup.create_backup("1234").await.unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[tokio::test]
    async fn test_excessive_iteration_count_rejected() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        storage
            .upload_backup(&BackupBlob {
                version: BACKUP_VERSION,
                ciphertext: vec![0; 32],
                salt: vec![0; 16],
                iv: vec![0; 12],
                conversation_ids: vec!["c".into()],
                kdf_iterations: MAX_PBKDF2_ITERATIONS + 1,
                created_at: 0,
            })
            .await
            .unwrap();

        assert!(matches!(
            dev.backup.restore_backup("1234").await,
            Err(Error::DeserializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_backup_includes_wrapped_only_keys() {
        let (server, storage) = setup();
        let old = device("alice", &server, &storage);
        let public = old.keystore.public_key().unwrap().unwrap();
        let pending = SessionKey::generate();
        let wrapped = asymmetric_encrypt(pending.as_bytes(), &public).unwrap();
        old.keystore
            .store_wrapped_session_key("pending", &wrapped)
            .unwrap();

        let blob = old.backup.create_and_upload_backup("1234").await.unwrap();
        assert_eq!(blob.conversation_ids, vec!["pending"]);

        let new = device("alice", &server, &storage);
        new.backup.restore_backup("1234").await.unwrap();
        assert_eq!(
            new.keystore.session_key("pending").unwrap().unwrap(),
            pending
        );
    }

    #[tokio::test]
    async fn test_backup_info_and_delete() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        assert!(!dev.backup.has_backup().await.unwrap());
        assert!(dev.backup.backup_info().await.unwrap().is_none());

        dev.keystore
            .store_session_key("a", &SessionKey::generate())
            .unwrap();
        dev.keystore
            .store_session_key("b", &SessionKey::generate())
            .unwrap();
        dev.backup.create_and_upload_backup("1234").await.unwrap();

        assert!(dev.backup.has_backup().await.unwrap());
        let info = dev.backup.backup_info().await.unwrap().unwrap();
        assert_eq!(info.conversation_count, 2);
        assert!(info.last_updated.timestamp() > 1_704_067_200);

        assert!(dev.backup.delete_backup().await.unwrap());
        assert!(!dev.backup.has_backup().await.unwrap());
        assert!(!dev.backup.delete_backup().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_without_identity() {
        let (server, storage) = setup();
        let dev = device("alice", &server, &storage);
        dev.keystore.set_active_identity(Some("nobody"));
        assert!(matches!(
            dev.backup.restore_backup("1234").await,
            Err(Error::IdentityNotFound(_))
        ));
    }

    #[test]
    fn test_phase_transitions() {
        use BackupPhase::*;

        assert!(Idle.can_transition_to(Collecting));
        assert!(Collecting.can_transition_to(Deriving));
        assert!(Deriving.can_transition_to(Encrypting));
        assert!(Deriving.can_transition_to(Decrypting));
        assert!(Encrypting.can_transition_to(Done));
        assert!(Decrypting.can_transition_to(Done));
        assert!(Deriving.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Done));
        assert!(!Collecting.can_transition_to(Encrypting));
        assert!(!Encrypting.can_transition_to(Decrypting));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Collecting));

        let mut tracker = PhaseTracker::new("test");
        tracker.advance(Collecting).unwrap();
        assert!(tracker.advance(Done).is_err());
        let failed: Result<()> = tracker.track(Err(Error::NothingToBackUp));
        assert!(failed.is_err());
        assert_eq!(tracker.phase, Failed);
    }

    #[test]
    fn test_blob_json() {
        let blob = BackupBlob {
            version: BACKUP_VERSION,
            ciphertext: vec![1, 2, 3],
            salt: vec![0; 16],
            iv: vec![0; 12],
            conversation_ids: vec!["conv-visible".into()],
            kdf_iterations: 150_000,
            created_at: 1_700_000_000,
        };
        let json = blob.to_json().unwrap();
        assert!(json.contains("conv-visible"));
        assert_eq!(BackupBlob::from_json(&json).unwrap(), blob);

        // Older blobs carry only the core fields
        let legacy = r#"{"ciphertext":"AQID","salt":"AAAAAAAAAAAAAAAAAAAAAA==","iv":"AAAAAAAAAAAAAAAA","conversation_ids":[]}"#;
        let parsed = BackupBlob::from_json(legacy).unwrap();
        assert_eq!(parsed.kdf_iterations, MIN_PBKDF2_ITERATIONS);
        assert_eq!(parsed.version, BACKUP_VERSION);
    }
}
