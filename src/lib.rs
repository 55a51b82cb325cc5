//! # Umbra E2EE
//!
//! End-to-end message confidentiality for multi-party conversations:
//! per-identity RSA keypairs, per-conversation AES session keys distributed
//! by hybrid encryption, a local key cache, and PIN-protected key backup.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         UMBRA E2EE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Backup / Restore          (backup)                             │   │
//! │  │  PIN → PBKDF2 → AES-GCM blob; restore re-wraps and re-publishes │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Session Orchestrator      (session)                            │   │
//! │  │  setup / resolve / encrypt / decrypt                            │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Key Store                 (keystore, storage)                  │   │
//! │  │  active identity, memory cache, encrypted persistent tier       │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Crypto Primitives         (crypto)                             │   │
//! │  │  RSA-OAEP, AES-256-GCM, PBKDF2, HKDF                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Remote collaborators (remote): public key directory, key server,      │
//! │  backup storage. Implemented by the host over its own transport.       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Tunable parameters and their security floors
//! - [`crypto`] - Cryptographic primitives (keys, wrapping, AEAD, KDFs)
//! - [`storage`] - Encrypted local persistence and the identity key container
//! - [`keystore`] - Identity-scoped session key cache
//! - [`session`] - Key distribution and message encryption
//! - [`backup`] - PIN-protected backup and restore
//! - [`remote`] - Contracts for the network services
//!
//! ## Security Model
//!
//! - Session keys leave the device only wrapped under a recipient's public
//!   key, or inside a PIN-encrypted backup.
//! - Locally stored keys are encrypted at rest with a key derived from a
//!   device secret the host provides.
//! - Key material never appears in logs; only short fingerprints do.

pub mod backup;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod remote;
pub mod session;
pub mod storage;

pub mod time;

pub use backup::{BackupBlob, BackupInfo, BackupManager, RestoreReport};
pub use config::E2eeConfig;
pub use crypto::{IdentityPublicKey, SessionKey};
pub use error::{Error, Result};
pub use keystore::KeyStore;
pub use session::{
    DistributionOutcome, DistributionReport, EncryptedMessagePayload, SessionOrchestrator,
};

use std::sync::Arc;

use remote::{BackupStorage, DirectoryService, KeyDistribution};
use storage::{IdentityKeyContainer, SecureStore, SoftwareKeyContainer};

/// Minimum length of the device secret the at-rest key is derived from
pub const MIN_DEVICE_SECRET_LEN: usize = 16;

/// HKDF scope for the persistent key tier
const STORAGE_SCOPE: &[u8] = b"umbra-e2ee-keystore";

/// Network services the context talks to
#[derive(Clone)]
pub struct RemoteServices {
    /// Public key directory
    pub directory: Arc<dyn DirectoryService>,
    /// Key server client, authenticated as the local user
    pub distribution: Arc<dyn KeyDistribution>,
    /// Backup storage for the local user's account
    pub backup_storage: Arc<dyn BackupStorage>,
}

/// Wires the key store, session orchestrator and backup manager together
///
/// ## Lifecycle
///
/// ```text
/// E2eeContext::open(config, device_secret, remote)
///     │
///     ├──► validate config
///     ├──► open storage backend (SQLite file or memory)
///     ├──► HKDF(device_secret) → at-rest key → SecureStore
///     └──► KeyStore → SessionOrchestrator, BackupManager
///
/// keystore().set_active_identity(Some(user))
/// keystore().generate_and_store_identity_key_pair()   (first run)
///     │
///     ▼
/// sessions() / backups()
/// ```
pub struct E2eeContext {
    config: E2eeConfig,
    keystore: Arc<KeyStore>,
    sessions: Arc<SessionOrchestrator>,
    backups: Arc<BackupManager>,
}

impl E2eeContext {
    /// Open a context with the software key container
    pub fn open(config: E2eeConfig, device_secret: &[u8], remote: RemoteServices) -> Result<Self> {
        Self::build(config, device_secret, remote, None)
    }

    /// Open a context whose identity keys live in `container`
    ///
    /// Hosts with a hardware keystore pass their own container here.
    pub fn with_key_container(
        config: E2eeConfig,
        device_secret: &[u8],
        remote: RemoteServices,
        container: Arc<dyn IdentityKeyContainer>,
    ) -> Result<Self> {
        Self::build(config, device_secret, remote, Some(container))
    }

    fn build(
        config: E2eeConfig,
        device_secret: &[u8],
        remote: RemoteServices,
        container: Option<Arc<dyn IdentityKeyContainer>>,
    ) -> Result<Self> {
        tracing::info!("Initializing Umbra E2EE v{}", version());
        config.validate()?;

        if device_secret.len() < MIN_DEVICE_SECRET_LEN {
            return Err(Error::InvalidConfig(format!(
                "device secret must be at least {} bytes",
                MIN_DEVICE_SECRET_LEN
            )));
        }

        let backend = storage::open_backend(config.storage_path.as_deref())?;
        let storage_key = crypto::derive_storage_key(device_secret, STORAGE_SCOPE)?;
        let store = SecureStore::new(backend, storage_key);

        let container = match container {
            Some(c) => c,
            None => Arc::new(SoftwareKeyContainer::new(store.clone())),
        };

        let keystore = Arc::new(KeyStore::new(store, container, config.rsa_key_bits));
        let sessions = Arc::new(SessionOrchestrator::new(
            keystore.clone(),
            remote.directory,
            remote.distribution.clone(),
        ));
        let backups = Arc::new(BackupManager::new(
            keystore.clone(),
            remote.backup_storage,
            remote.distribution,
            config.pbkdf2_iterations,
            config.salt_len,
        ));

        tracing::info!("Umbra E2EE initialized successfully");
        Ok(Self {
            config,
            keystore,
            sessions,
            backups,
        })
    }

    /// The active configuration
    pub fn config(&self) -> &E2eeConfig {
        &self.config
    }

    /// Identity and session key storage
    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// Key distribution and message encryption
    pub fn sessions(&self) -> &Arc<SessionOrchestrator> {
        &self.sessions
    }

    /// Backup and restore
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Get the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================
