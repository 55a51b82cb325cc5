//! # Session Orchestrator
//!
//! Creates and distributes conversation session keys, resolves a usable key
//! on demand, and encrypts and decrypts message payloads.
//!
//! ## Conversation Setup
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    SESSION KEY DISTRIBUTION                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  1. SessionKey::generate()                                              │
//! │                                                                         │
//! │  2. DirectoryService::public_keys([A, B, C])     (one round trip)       │
//! │                                                                         │
//! │  3. For each participant:                                               │
//! │       no key / bad key / wrap error ──► warn + skip                     │
//! │       otherwise ──► WrappedSessionKey                                   │
//! │                                                                         │
//! │  4. Zero wrapped keys ──► Error::NoParticipantsReachable                │
//! │                                                                         │
//! │  5. KeyDistribution::publish_wrapped_keys(...)                          │
//! │                                                                         │
//! │  6. KeyStore::store_session_key(...)    (only after publish succeeded)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Resolution
//!
//! ```text
//! session_key(conv)
//!     │
//!     ├── KeyStore: decrypted key or locally stored wrapped key ──► done
//!     │
//!     └── KeyDistribution::fetch_my_wrapped_key(conv)
//!             │
//!             ├── None ──► None
//!             └── Some(wrapped) ──► store wrapped ──► unwrap ──► done
//! ```
//!
//! Abandoning a setup midway leaves nothing inconsistent: published keys are
//! never retracted and the local copy is written last.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::{
    asymmetric_encrypt, authenticated_decrypt, authenticated_encrypt, decode_public_key, Nonce,
    SessionKey,
};
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::remote::{base64_bytes, DirectoryService, KeyDistribution, WrappedSessionKey};

/// An encrypted message body as carried by the message transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessagePayload {
    /// AES-256-GCM ciphertext with the 16-byte tag appended
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// 12-byte IV
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

impl EncryptedMessagePayload {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

/// Whether every participant received the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionOutcome {
    /// Every participant received a wrapped key
    Complete,
    /// At least one participant was skipped
    Partial,
}

/// Result of one distribution round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionReport {
    /// Conversation the key was created for
    pub conversation_id: String,
    /// Participants a wrapped key was published for
    pub delivered: Vec<String>,
    /// Participants that were skipped
    pub unreachable: Vec<String>,
}

impl DistributionReport {
    /// Complete or partial
    pub fn outcome(&self) -> DistributionOutcome {
        if self.unreachable.is_empty() {
            DistributionOutcome::Complete
        } else {
            DistributionOutcome::Partial
        }
    }
}

/// Coordinates session keys between the key store and the remote services
pub struct SessionOrchestrator {
    keystore: Arc<KeyStore>,
    directory: Arc<dyn DirectoryService>,
    distribution: Arc<dyn KeyDistribution>,
}

impl SessionOrchestrator {
    /// Create an orchestrator
    ///
    /// `distribution` must be authenticated as the key store's active user.
    pub fn new(
        keystore: Arc<KeyStore>,
        directory: Arc<dyn DirectoryService>,
        distribution: Arc<dyn KeyDistribution>,
    ) -> Self {
        Self {
            keystore,
            directory,
            distribution,
        }
    }

    /// The key store this orchestrator writes to
    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    // ========================================================================
    // DISTRIBUTION
    // ========================================================================

    /// Create a session key for a new conversation and distribute it
    ///
    /// The caller's own user id should be in `participants` to be able to
    /// recover the key from the server later. Participants without a usable
    /// public key are skipped and listed in the report.
    ///
    /// ## Errors
    ///
    /// - [`Error::NoParticipantsReachable`] if nobody could receive the key
    /// - [`Error::DirectoryLookupFailed`] / [`Error::TransportFailed`] from
    ///   the remote services
    ///
    /// No local key is stored on error.
    pub async fn setup_conversation_encryption(
        &self,
        conversation_id: &str,
        participants: &[String],
    ) -> Result<DistributionReport> {
        let (key, report) = self.distribute_new_key(conversation_id, participants).await?;
        self.keystore.store_session_key(conversation_id, &key)?;

        tracing::info!(
            "Encryption set up for {} ({} of {} participants, key {})",
            conversation_id,
            report.delivered.len(),
            report.delivered.len() + report.unreachable.len(),
            key.fingerprint()
        );
        Ok(report)
    }

    /// Replace a conversation's key with a fresh one and distribute it
    ///
    /// The local key is swapped only after the new one has been published.
    pub async fn rotate_conversation_key(
        &self,
        conversation_id: &str,
        participants: &[String],
    ) -> Result<DistributionReport> {
        let (key, report) = self.distribute_new_key(conversation_id, participants).await?;

        self.keystore.clear_session_key(conversation_id)?;
        self.keystore.store_session_key(conversation_id, &key)?;

        tracing::info!(
            "Rotated key for {} (new key {}, {} unreachable)",
            conversation_id,
            key.fingerprint(),
            report.unreachable.len()
        );
        Ok(report)
    }

    async fn distribute_new_key(
        &self,
        conversation_id: &str,
        participants: &[String],
    ) -> Result<(SessionKey, DistributionReport)> {
        self.keystore
            .active_identity()
            .ok_or(Error::NoActiveIdentity)?;

        let mut unique: Vec<String> = Vec::with_capacity(participants.len());
        for p in participants {
            if !unique.contains(p) {
                unique.push(p.clone());
            }
        }

        let key = SessionKey::generate();

        let directory: HashMap<String, Option<Vec<u8>>> = self
            .directory
            .public_keys(&unique)
            .await?
            .into_iter()
            .map(|entry| (entry.user_id, entry.public_key))
            .collect();

        let mut wrapped = Vec::with_capacity(unique.len());
        let mut delivered = Vec::new();
        let mut unreachable = Vec::new();

        for user_id in unique {
            match Self::wrap_for(&key, conversation_id, &user_id, directory.get(&user_id)) {
                Ok(w) => {
                    wrapped.push(w);
                    delivered.push(user_id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Skipping {} for conversation {}: {}",
                        user_id,
                        conversation_id,
                        e
                    );
                    unreachable.push(user_id);
                }
            }
        }

        if wrapped.is_empty() {
            return Err(Error::NoParticipantsReachable(conversation_id.to_string()));
        }

        self.distribution
            .publish_wrapped_keys(conversation_id, &wrapped)
            .await?;

        Ok((
            key,
            DistributionReport {
                conversation_id: conversation_id.to_string(),
                delivered,
                unreachable,
            },
        ))
    }

    fn wrap_for(
        key: &SessionKey,
        conversation_id: &str,
        user_id: &str,
        entry: Option<&Option<Vec<u8>>>,
    ) -> Result<WrappedSessionKey> {
        let der = entry
            .and_then(|k| k.as_deref())
            .ok_or_else(|| Error::InvalidKey(format!("no public key registered for {}", user_id)))?;
        let public_key = decode_public_key(der)?;
        let ciphertext = asymmetric_encrypt(key.as_bytes(), &public_key)?;

        Ok(WrappedSessionKey {
            conversation_id: conversation_id.to_string(),
            recipient_user_id: user_id.to_string(),
            ciphertext,
        })
    }

    // ========================================================================
    // KEY RESOLUTION
    // ========================================================================

    /// Resolve a usable session key, fetching it from the key server if needed
    ///
    /// A locally stored wrapped key that no longer decrypts is dropped and
    /// the server copy is fetched instead.
    pub async fn session_key(&self, conversation_id: &str) -> Result<Option<SessionKey>> {
        match self.keystore.get_and_unwrap_session_key(conversation_id) {
            Ok(Some(key)) => return Ok(Some(key)),
            Ok(None) => {}
            Err(Error::DecryptionFailed(e)) | Err(Error::InvalidKey(e)) => {
                tracing::warn!(
                    "Stored wrapped key for {} is unusable, refetching: {}",
                    conversation_id,
                    e
                );
            }
            Err(e) => return Err(e),
        }

        let wrapped = match self
            .distribution
            .fetch_my_wrapped_key(conversation_id)
            .await?
        {
            Some(w) => w,
            None => {
                tracing::debug!("No wrapped key on server for {}", conversation_id);
                return Ok(None);
            }
        };

        self.keystore
            .store_wrapped_session_key(conversation_id, &wrapped)?;
        self.keystore.get_and_unwrap_session_key(conversation_id)
    }

    /// [`session_key`](Self::session_key), with a missing key as an error
    ///
    /// ## Errors
    ///
    /// [`Error::KeyNotFound`] if neither the local store nor the key server
    /// has a key for the caller.
    pub async fn require_session_key(&self, conversation_id: &str) -> Result<SessionKey> {
        self.session_key(conversation_id)
            .await?
            .ok_or_else(|| Error::KeyNotFound(conversation_id.to_string()))
    }

    /// Whether a decrypted key is held locally
    pub fn is_encryption_available(&self, conversation_id: &str) -> bool {
        self.keystore.has_session_key(conversation_id)
    }

    /// Drop the local key of a deleted conversation
    pub fn forget_conversation(&self, conversation_id: &str) -> Result<()> {
        self.keystore.clear_session_key(conversation_id)
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Encrypt a message body
    ///
    /// `None` if no key can be resolved or encryption fails. The caller must
    /// then refuse to send: there is no plaintext fallback.
    pub async fn encrypt_message(
        &self,
        plaintext: &[u8],
        conversation_id: &str,
    ) -> Option<EncryptedMessagePayload> {
        let key = self.resolve_for_message(conversation_id).await?;

        match authenticated_encrypt(plaintext, key.encryption_key()) {
            Ok((ciphertext, nonce)) => Some(EncryptedMessagePayload {
                ciphertext,
                iv: nonce.as_bytes().to_vec(),
            }),
            Err(e) => {
                tracing::warn!("Encrypting for {} failed: {}", conversation_id, e);
                None
            }
        }
    }

    /// Decrypt a message body
    ///
    /// `None` on a missing key, a malformed IV, or a failed authentication.
    pub async fn decrypt_message(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        conversation_id: &str,
    ) -> Option<Vec<u8>> {
        let nonce = match Nonce::from_slice(iv) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Message for {} has a bad IV: {}", conversation_id, e);
                return None;
            }
        };

        let key = self.resolve_for_message(conversation_id).await?;

        match authenticated_decrypt(ciphertext, &nonce, key.encryption_key()) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::warn!("Decrypting for {} failed: {}", conversation_id, e);
                None
            }
        }
    }

    /// [`decrypt_message`](Self::decrypt_message) for a whole payload
    pub async fn decrypt_payload(
        &self,
        payload: &EncryptedMessagePayload,
        conversation_id: &str,
    ) -> Option<Vec<u8>> {
        self.decrypt_message(&payload.ciphertext, &payload.iv, conversation_id)
            .await
    }

    async fn resolve_for_message(&self, conversation_id: &str) -> Option<SessionKey> {
        match self.session_key(conversation_id).await {
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                tracing::warn!("No session key for {}", conversation_id);
                None
            }
            Err(e) => {
                tracing::warn!("Resolving key for {} failed: {}", conversation_id, e);
                None
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
