//! # Key Store
//!
//! The identity keypair and the per-conversation session key cache, scoped to
//! one active identity.
//!
//! ## Key Tiers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           KEY STORE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  session_key(conv)                                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────┐  miss   ┌─────────────────┐  miss                 │
//! │  │  Memory cache   │ ──────► │ Persistent tier │ ──────► None          │
//! │  │ (user, conv) →  │         │ SecureStore     │                       │
//! │  │   SessionKey    │ ◄────── │ umbra.session.* │                       │
//! │  └─────────────────┘ populate└─────────────────┘                       │
//! │                                                                         │
//! │  get_and_unwrap_session_key(conv)                                      │
//! │       │                                                                 │
//! │       ├── decrypted key held? ──► return it                            │
//! │       │                                                                 │
//! │       └── umbra.wrapped.* ──RSA-OAEP (PrivateKeyHandle)──► SessionKey  │
//! │                                   │                                     │
//! │                                   └──► cache + persist                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Namespacing
//!
//! Every record name embeds the active user and the conversation, each
//! base64url encoded so neither can contain the `.` separator:
//!
//! ```text
//! umbra.session.<user>.<conversation>    decrypted session key
//! umbra.wrapped.<user>.<conversation>    RSA-wrapped session key
//! umbra.identity.<user>                  software identity keypair
//! ```
//!
//! Switching the active identity makes the previous user's keys invisible
//! without deleting them.
//!
//! ## Concurrency
//!
//! One mutex guards the cache together with every read-modify-write that
//! spans cache and persistent tier. It is never held across an `.await`:
//! all methods here are synchronous.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use parking_lot::Mutex;

use crate::crypto::{decode_session_key, encode_session_key, IdentityPublicKey, SessionKey};
use crate::error::{Error, Result};
use crate::storage::{keys, IdentityKeyContainer, PrivateKeyHandle, SecureStore};

/// Cache key: (user id, conversation id)
type ScopedId = (String, String);

struct KeyStoreState {
    active_user: Option<String>,
    cache: HashMap<ScopedId, SessionKey>,
}

/// Thread-safe store for identity and session keys
pub struct KeyStore {
    state: Mutex<KeyStoreState>,
    store: SecureStore,
    container: Arc<dyn IdentityKeyContainer>,
    rsa_key_bits: usize,
}

fn encode_component(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

fn decode_component(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

fn user_prefix(kind: &str, user: &str) -> String {
    format!("{}.{}.", kind, encode_component(user))
}

fn record_name(kind: &str, user: &str, conversation_id: &str) -> String {
    format!("{}{}", user_prefix(kind, user), encode_component(conversation_id))
}

impl KeyStore {
    /// Create a key store
    ///
    /// `store` holds the persistent tier. `container` holds identity keypairs.
    pub fn new(
        store: SecureStore,
        container: Arc<dyn IdentityKeyContainer>,
        rsa_key_bits: usize,
    ) -> Self {
        Self {
            state: Mutex::new(KeyStoreState {
                active_user: None,
                cache: HashMap::new(),
            }),
            store,
            container,
            rsa_key_bits,
        }
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    /// Select the user all scoped operations apply to (`None` to sign out)
    pub fn set_active_identity(&self, user_id: Option<&str>) {
        let mut state = self.state.lock();
        state.active_user = user_id.map(str::to_string);
        match user_id {
            Some(u) => tracing::info!("Active identity set to {}", u),
            None => tracing::info!("Active identity cleared"),
        }
    }

    /// The currently active user, if any
    pub fn active_identity(&self) -> Option<String> {
        self.state.lock().active_user.clone()
    }

    fn require_active(&self) -> Result<String> {
        self.active_identity().ok_or(Error::NoActiveIdentity)
    }

    fn identity_alias(user: &str) -> String {
        encode_component(user)
    }

    /// Generate a keypair for the active user, replacing any previous one
    ///
    /// Wrapped keys stored locally for this user were addressed to the old
    /// public key and are discarded.
    pub fn generate_and_store_identity_key_pair(&self) -> Result<IdentityPublicKey> {
        let user = self.require_active()?;
        let public_key = self
            .container
            .generate(&Self::identity_alias(&user), self.rsa_key_bits)?;

        let _state = self.state.lock();
        let stale = self
            .store
            .keys_with_prefix(&user_prefix(keys::WRAPPED_PREFIX, &user))?;
        for name in &stale {
            self.store.delete(name)?;
        }

        tracing::info!(
            "Generated RSA-{} identity for {} ({} stale wrapped keys dropped)",
            public_key.bits(),
            user,
            stale.len()
        );
        Ok(public_key)
    }

    /// Decrypt-only handle to the active user's private key
    ///
    /// `Ok(None)` if the active user has no keypair.
    pub fn private_key_handle(&self) -> Result<Option<PrivateKeyHandle>> {
        let user = self.require_active()?;
        let alias = Self::identity_alias(&user);
        if self.container.contains(&alias)? {
            Ok(Some(PrivateKeyHandle::new(alias, self.container.clone())))
        } else {
            Ok(None)
        }
    }

    /// The active user's public key, if a keypair exists
    pub fn public_key(&self) -> Result<Option<IdentityPublicKey>> {
        let user = self.require_active()?;
        self.container.public_key(&Self::identity_alias(&user))
    }

    // ========================================================================
    // SESSION KEYS
    // ========================================================================

    /// Store a decrypted session key in memory and in the persistent tier
    ///
    /// Storing the same key twice is a no-op.
    pub fn store_session_key(&self, conversation_id: &str, key: &SessionKey) -> Result<()> {
        let mut state = self.state.lock();
        let user = state.active_user.clone().ok_or(Error::NoActiveIdentity)?;
        let scoped = (user.clone(), conversation_id.to_string());

        if state.cache.get(&scoped) == Some(key) {
            return Ok(());
        }

        self.store.store(
            &record_name(keys::SESSION_PREFIX, &user, conversation_id),
            &encode_session_key(key),
        )?;
        state.cache.insert(scoped, key.clone());

        tracing::debug!(
            "Stored session key {} for conversation {}",
            key.fingerprint(),
            conversation_id
        );
        Ok(())
    }

    /// Look up a decrypted session key
    ///
    /// A memory hit returns immediately. A miss falls through to the
    /// persistent tier and populates the cache.
    pub fn session_key(&self, conversation_id: &str) -> Result<Option<SessionKey>> {
        let mut state = self.state.lock();
        let user = state.active_user.clone().ok_or(Error::NoActiveIdentity)?;
        self.session_key_locked(&mut state, &user, conversation_id)
    }

    fn session_key_locked(
        &self,
        state: &mut KeyStoreState,
        user: &str,
        conversation_id: &str,
    ) -> Result<Option<SessionKey>> {
        let scoped = (user.to_string(), conversation_id.to_string());
        if let Some(key) = state.cache.get(&scoped) {
            return Ok(Some(key.clone()));
        }

        let stored = self
            .store
            .retrieve(&record_name(keys::SESSION_PREFIX, user, conversation_id))?;
        match stored {
            Some(bytes) => {
                let key = decode_session_key(&bytes)?;
                state.cache.insert(scoped, key.clone());
                tracing::debug!("Loaded session key for {} from storage", conversation_id);
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Store a session key wrapped under the active user's public key
    pub fn store_wrapped_session_key(&self, conversation_id: &str, wrapped: &[u8]) -> Result<()> {
        let state = self.state.lock();
        let user = self.require_active_locked(&state)?;
        self.store.store(
            &record_name(keys::WRAPPED_PREFIX, &user, conversation_id),
            wrapped,
        )
    }

    fn require_active_locked(&self, state: &KeyStoreState) -> Result<String> {
        state.active_user.clone().ok_or(Error::NoActiveIdentity)
    }

    /// Resolve a session key, unwrapping a stored wrapped key if needed
    ///
    /// Returns `Ok(None)` when neither a decrypted nor a wrapped key exists.
    /// A wrapped key that fails to decrypt is an error, and the wrapped
    /// record is dropped so a fresh copy can be fetched and stored.
    pub fn get_and_unwrap_session_key(&self, conversation_id: &str) -> Result<Option<SessionKey>> {
        let mut state = self.state.lock();
        let user = self.require_active_locked(&state)?;
        self.unwrap_locked(&mut state, &user, conversation_id)
    }

    fn unwrap_locked(
        &self,
        state: &mut KeyStoreState,
        user: &str,
        conversation_id: &str,
    ) -> Result<Option<SessionKey>> {
        if let Some(key) = self.session_key_locked(state, user, conversation_id)? {
            return Ok(Some(key));
        }

        let wrapped_name = record_name(keys::WRAPPED_PREFIX, user, conversation_id);
        let wrapped = match self.store.retrieve(&wrapped_name)? {
            Some(w) => w,
            None => return Ok(None),
        };

        let alias = Self::identity_alias(user);
        if !self.container.contains(&alias)? {
            return Err(Error::IdentityNotFound(user.to_string()));
        }
        let key = match self
            .container
            .decrypt(&alias, &wrapped)
            .and_then(|raw| decode_session_key(&raw))
        {
            Ok(k) => k,
            Err(e) => {
                // Addressed to another keypair or corrupted
                self.store.delete(&wrapped_name)?;
                tracing::warn!(
                    "Dropped undecryptable wrapped key for conversation {}: {}",
                    conversation_id,
                    e
                );
                return Err(e);
            }
        };

        self.store.store(
            &record_name(keys::SESSION_PREFIX, user, conversation_id),
            &encode_session_key(&key),
        )?;
        state
            .cache
            .insert((user.to_string(), conversation_id.to_string()), key.clone());

        tracing::info!(
            "Unwrapped session key {} for conversation {}",
            key.fingerprint(),
            conversation_id
        );
        Ok(Some(key))
    }

    /// Remove the key (decrypted and wrapped) for one conversation
    pub fn clear_session_key(&self, conversation_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let user = self.require_active_locked(&state)?;

        state
            .cache
            .remove(&(user.clone(), conversation_id.to_string()));
        self.store
            .delete(&record_name(keys::SESSION_PREFIX, &user, conversation_id))?;
        self.store
            .delete(&record_name(keys::WRAPPED_PREFIX, &user, conversation_id))?;

        tracing::info!("Cleared session key for conversation {}", conversation_id);
        Ok(())
    }

    /// Remove every session key of the active user
    ///
    /// Returns the number of records removed from the persistent tier.
    /// Other users' keys are untouched.
    pub fn clear_all_session_keys_for_active_user(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let user = self.require_active_locked(&state)?;

        state.cache.retain(|(u, _), _| *u != user);

        let mut removed = 0;
        for kind in [keys::SESSION_PREFIX, keys::WRAPPED_PREFIX] {
            for name in self.store.keys_with_prefix(&user_prefix(kind, &user))? {
                if self.store.delete(&name)? {
                    removed += 1;
                }
            }
        }

        tracing::info!("Cleared {} stored keys for {}", removed, user);
        Ok(removed)
    }

    /// Whether a decrypted key is held for the conversation
    ///
    /// False without an active identity.
    pub fn has_session_key(&self, conversation_id: &str) -> bool {
        let state = self.state.lock();
        let user = match &state.active_user {
            Some(u) => u.clone(),
            None => return false,
        };

        if state
            .cache
            .contains_key(&(user.clone(), conversation_id.to_string()))
        {
            return true;
        }

        match self
            .store
            .exists(&record_name(keys::SESSION_PREFIX, &user, conversation_id))
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Key lookup for {} failed: {}", conversation_id, e);
                false
            }
        }
    }

    /// Conversations with a decrypted key for the active user
    pub fn conversation_ids(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        let user = self.require_active_locked(&state)?;
        self.conversation_ids_locked(&state, &user)
    }

    fn conversation_ids_locked(&self, state: &KeyStoreState, user: &str) -> Result<Vec<String>> {
        let mut ids = self.stored_conversation_ids(keys::SESSION_PREFIX, user)?;
        for (u, conv) in state.cache.keys() {
            if u == user && !ids.contains(conv) {
                ids.push(conv.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn stored_conversation_ids(&self, kind: &str, user: &str) -> Result<Vec<String>> {
        let prefix = user_prefix(kind, user);
        Ok(self
            .store
            .keys_with_prefix(&prefix)?
            .iter()
            .filter_map(|name| {
                let id = name.strip_prefix(&prefix).and_then(decode_component);
                if id.is_none() {
                    tracing::warn!("Skipping malformed key record {}", name);
                }
                id
            })
            .collect())
    }

    /// Every session key of the active user
    ///
    /// Wrapped keys that were never unwrapped are unwrapped first. Ones
    /// that fail to decrypt are left out.
    pub fn all_session_keys(&self) -> Result<Vec<(String, SessionKey)>> {
        let mut state = self.state.lock();
        let user = self.require_active_locked(&state)?;

        let mut found = BTreeMap::new();
        for conv in self.conversation_ids_locked(&state, &user)? {
            if let Some(key) = self.session_key_locked(&mut state, &user, &conv)? {
                found.insert(conv, key);
            }
        }

        for conv in self.stored_conversation_ids(keys::WRAPPED_PREFIX, &user)? {
            if found.contains_key(&conv) {
                continue;
            }
            match self.unwrap_locked(&mut state, &user, &conv) {
                Ok(Some(key)) => {
                    found.insert(conv, key);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Leaving out wrapped key for {}: {}", conv, e),
            }
        }
        Ok(found.into_iter().collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{asymmetric_encrypt, EncryptionKey};
    use crate::storage::{MemoryBackend, SoftwareKeyContainer, StorageBackend};

    fn keystore_over(backend: Arc<dyn StorageBackend>) -> KeyStore {
        let store = SecureStore::new(backend, EncryptionKey::from_bytes([1u8; 32]));
        let container = Arc::new(SoftwareKeyContainer::new(store.clone()));
        KeyStore::new(store, container, 2048)
    }

    fn keystore() -> KeyStore {
        keystore_over(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_requires_active_identity() {
        let ks = keystore();
        let key = SessionKey::generate();

        assert!(matches!(
            ks.store_session_key("c", &key),
            Err(Error::NoActiveIdentity)
        ));
        assert!(matches!(ks.session_key("c"), Err(Error::NoActiveIdentity)));
        assert!(matches!(ks.public_key(), Err(Error::NoActiveIdentity)));
        assert!(matches!(
            ks.generate_and_store_identity_key_pair(),
            Err(Error::NoActiveIdentity)
        ));
        assert!(!ks.has_session_key("c"));
    }

    #[test]
    fn test_store_and_get() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        let key = SessionKey::generate();

        assert!(ks.session_key("conv-1").unwrap().is_none());
        ks.store_session_key("conv-1", &key).unwrap();
        assert_eq!(ks.session_key("conv-1").unwrap().unwrap(), key);
        assert!(ks.has_session_key("conv-1"));
    }

    #[test]
    fn test_store_is_idempotent() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        let key = SessionKey::generate();

        ks.store_session_key("conv-1", &key).unwrap();
        ks.store_session_key("conv-1", &key).unwrap();

        assert_eq!(ks.session_key("conv-1").unwrap().unwrap(), key);
        assert_eq!(ks.conversation_ids().unwrap(), vec!["conv-1"]);
    }

    #[test]
    fn test_identity_isolation() {
        let ks = keystore();
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();

        ks.set_active_identity(Some("U1"));
        ks.store_session_key("shared", &k1).unwrap();

        ks.set_active_identity(Some("U2"));
        assert!(ks.session_key("shared").unwrap().is_none());
        assert!(!ks.has_session_key("shared"));
        ks.store_session_key("shared", &k2).unwrap();

        ks.set_active_identity(Some("U1"));
        assert_eq!(ks.session_key("shared").unwrap().unwrap(), k1);

        ks.set_active_identity(Some("U2"));
        assert_eq!(ks.session_key("shared").unwrap().unwrap(), k2);
    }

    #[test]
    fn test_ids_with_separators_do_not_collide() {
        let ks = keystore();
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();

        ks.set_active_identity(Some("a.b"));
        ks.store_session_key("c", &k1).unwrap();
        ks.set_active_identity(Some("a"));
        ks.store_session_key("b.c", &k2).unwrap();

        assert_eq!(ks.conversation_ids().unwrap(), vec!["b.c"]);
        ks.set_active_identity(Some("a.b"));
        assert_eq!(ks.session_key("c").unwrap().unwrap(), k1);
    }

    #[test]
    fn test_persistent_fall_through_after_cache_loss() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let key = SessionKey::generate();

        {
            let ks = keystore_over(backend.clone());
            ks.set_active_identity(Some("alice"));
            ks.store_session_key("conv-1", &key).unwrap();
        }

        let ks = keystore_over(backend);
        ks.set_active_identity(Some("alice"));
        assert!(ks.has_session_key("conv-1"));
        assert_eq!(ks.session_key("conv-1").unwrap().unwrap(), key);
    }

    #[test]
    fn test_unwrap_stored_wrapped_key() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        let public = ks.generate_and_store_identity_key_pair().unwrap();
        assert_eq!(ks.public_key().unwrap().unwrap(), public);

        let key = SessionKey::generate();
        let wrapped = asymmetric_encrypt(key.as_bytes(), &public).unwrap();
        ks.store_wrapped_session_key("conv-1", &wrapped).unwrap();

        // Wrapped keys don't count as available until unwrapped
        assert!(!ks.has_session_key("conv-1"));

        let unwrapped = ks.get_and_unwrap_session_key("conv-1").unwrap().unwrap();
        assert_eq!(unwrapped, key);
        assert!(ks.has_session_key("conv-1"));
        assert_eq!(ks.session_key("conv-1").unwrap().unwrap(), key);
    }

    #[test]
    fn test_unwrap_missing_and_undecryptable() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        ks.generate_and_store_identity_key_pair().unwrap();

        assert!(ks.get_and_unwrap_session_key("none").unwrap().is_none());

        ks.store_wrapped_session_key("bad", &[0u8; 256]).unwrap();
        assert!(matches!(
            ks.get_and_unwrap_session_key("bad"),
            Err(Error::DecryptionFailed(_))
        ));

        // The bad record is gone, so a fresh copy can replace it
        assert!(ks.get_and_unwrap_session_key("bad").unwrap().is_none());

        let public = ks.public_key().unwrap().unwrap();
        let key = SessionKey::generate();
        let wrapped = asymmetric_encrypt(key.as_bytes(), &public).unwrap();
        ks.store_wrapped_session_key("bad", &wrapped).unwrap();
        assert_eq!(ks.get_and_unwrap_session_key("bad").unwrap().unwrap(), key);
    }

    #[test]
    fn test_private_key_handle() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        assert!(ks.private_key_handle().unwrap().is_none());
        assert!(ks.public_key().unwrap().is_none());

        let public = ks.generate_and_store_identity_key_pair().unwrap();
        let handle = ks.private_key_handle().unwrap().unwrap();
        let wrapped = asymmetric_encrypt(b"hello", &public).unwrap();
        assert_eq!(handle.decrypt(&wrapped).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_regenerating_identity_drops_wrapped_keys() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        let old = ks.generate_and_store_identity_key_pair().unwrap();
        let wrapped = asymmetric_encrypt(SessionKey::generate().as_bytes(), &old).unwrap();
        ks.store_wrapped_session_key("conv-1", &wrapped).unwrap();

        let new = ks.generate_and_store_identity_key_pair().unwrap();
        assert_ne!(old, new);
        assert!(ks.get_and_unwrap_session_key("conv-1").unwrap().is_none());
    }

    #[test]
    fn test_clear_session_key() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        ks.store_session_key("a", &SessionKey::generate()).unwrap();
        ks.store_session_key("b", &SessionKey::generate()).unwrap();

        ks.clear_session_key("a").unwrap();
        assert!(!ks.has_session_key("a"));
        assert!(ks.session_key("a").unwrap().is_none());
        assert!(ks.has_session_key("b"));
    }

    #[test]
    fn test_clear_all_only_touches_active_user() {
        let ks = keystore();
        ks.set_active_identity(Some("bob"));
        let bobs = SessionKey::generate();
        ks.store_session_key("x", &bobs).unwrap();

        ks.set_active_identity(Some("alice"));
        ks.store_session_key("x", &SessionKey::generate()).unwrap();
        ks.store_session_key("y", &SessionKey::generate()).unwrap();
        ks.store_wrapped_session_key("z", &[1, 2, 3]).unwrap();

        assert_eq!(ks.clear_all_session_keys_for_active_user().unwrap(), 3);
        assert!(ks.all_session_keys().unwrap().is_empty());

        ks.set_active_identity(Some("bob"));
        assert_eq!(ks.session_key("x").unwrap().unwrap(), bobs);
    }

    #[test]
    fn test_all_session_keys() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        ks.store_session_key("b", &b).unwrap();
        ks.store_session_key("a", &a).unwrap();

        let all = ks.all_session_keys().unwrap();
        assert_eq!(all, vec![("a".to_string(), a), ("b".to_string(), b)]);
    }

    #[test]
    fn test_all_session_keys_includes_wrapped_only() {
        let ks = keystore();
        ks.set_active_identity(Some("alice"));
        let public = ks.generate_and_store_identity_key_pair().unwrap();

        let plain = SessionKey::generate();
        ks.store_session_key("a", &plain).unwrap();

        let pending = SessionKey::generate();
        let wrapped = asymmetric_encrypt(pending.as_bytes(), &public).unwrap();
        ks.store_wrapped_session_key("b", &wrapped).unwrap();
        ks.store_wrapped_session_key("c", &[0u8; 256]).unwrap();

        let all = ks.all_session_keys().unwrap();
        assert_eq!(all, vec![("a".to_string(), plain), ("b".to_string(), pending)]);
        assert!(ks.has_session_key("b"));
        assert!(!ks.has_session_key("c"));
    }

    #[test]
    fn test_concurrent_unwrap_of_one_key() {
        let ks = Arc::new(keystore());
        ks.set_active_identity(Some("alice"));
        let public = ks.generate_and_store_identity_key_pair().unwrap();

        let key = SessionKey::generate();
        let wrapped = asymmetric_encrypt(key.as_bytes(), &public).unwrap();
        ks.store_wrapped_session_key("conv", &wrapped).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ks = ks.clone();
                std::thread::spawn(move || ks.get_and_unwrap_session_key("conv").unwrap().unwrap())
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), key);
        }
        assert_eq!(ks.conversation_ids().unwrap(), vec!["conv"]);
    }

    #[test]
    fn test_concurrent_stores() {
        let ks = Arc::new(keystore());
        ks.set_active_identity(Some("alice"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ks = ks.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let conv = format!("conv-{}-{}", i, j);
                        ks.store_session_key(&conv, &SessionKey::generate()).unwrap();
                        assert!(ks.session_key(&conv).unwrap().is_some());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ks.conversation_ids().unwrap().len(), 80);
    }
}
