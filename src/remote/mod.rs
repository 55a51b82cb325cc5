//! # Remote Collaborators
//!
//! Contracts for the services the encryption core talks to over the network.
//! The host application implements these over its own transport.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    EXTERNAL INTERFACES                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  DirectoryService     user id ──► registered public key (SPKI DER)     │
//! │                                                                         │
//! │  KeyDistribution      publish WrappedSessionKey set for a conversation │
//! │                       fetch the caller's own wrapped key               │
//! │                                                                         │
//! │  BackupStorage        one PIN-encrypted BackupBlob per account         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call is a suspension point. Implementations report an unreachable
//! service as [`Error::TransportFailed`](crate::Error::TransportFailed) or
//! [`Error::DirectoryLookupFailed`](crate::Error::DirectoryLookupFailed);
//! nothing in this crate retries.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backup::BackupBlob;
use crate::error::Result;

/// One directory answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The user that was looked up
    pub user_id: String,
    /// SPKI DER public key, `None` if the user never registered one
    #[serde(with = "base64_bytes::option")]
    pub public_key: Option<Vec<u8>>,
}

/// A session key encrypted for exactly one recipient
///
/// The only form in which a session key ever leaves the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedSessionKey {
    /// Conversation the key belongs to
    pub conversation_id: String,
    /// User whose public key wrapped it
    pub recipient_user_id: String,
    /// RSA-OAEP ciphertext
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Server-side summary of a stored backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Number of conversation keys in the backup
    pub conversation_count: usize,
    /// Unix timestamp (seconds) of the last upload
    pub updated_at: i64,
}

/// Public key directory
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Look up the currently registered public keys of `user_ids`
    ///
    /// One entry per requested user, in any order. Users without a key get
    /// `public_key: None`.
    async fn public_keys(&self, user_ids: &[String]) -> Result<Vec<DirectoryEntry>>;
}

/// Key server for wrapped session keys
#[async_trait]
pub trait KeyDistribution: Send + Sync {
    /// Publish wrapped keys for a conversation, replacing earlier ones per
    /// recipient
    async fn publish_wrapped_keys(
        &self,
        conversation_id: &str,
        keys: &[WrappedSessionKey],
    ) -> Result<()>;

    /// Fetch the wrapped key addressed to the authenticated caller
    async fn fetch_my_wrapped_key(&self, conversation_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Remote storage for the account's backup blob
#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Store `blob`, replacing any previous backup
    async fn upload_backup(&self, blob: &BackupBlob) -> Result<()>;

    /// Download the backup, `None` if the account has none
    async fn download_backup(&self) -> Result<Option<BackupBlob>>;

    /// Whether a backup exists
    async fn backup_exists(&self) -> Result<bool>;

    /// Summary of the stored backup
    async fn backup_metadata(&self) -> Result<Option<BackupMetadata>>;

    /// Remove the backup, returning whether one existed
    async fn delete_backup(&self) -> Result<bool>;
}

/// Serde helper for byte fields carried as standard base64 strings
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match bytes {
                Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<u8>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_key_json() {
        let wrapped = WrappedSessionKey {
            conversation_id: "conv".into(),
            recipient_user_id: "bob".into(),
            ciphertext: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };

        let json = serde_json::to_string(&wrapped).unwrap();
        assert!(json.contains("\"3q2+7w==\""));

        let parsed: WrappedSessionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, wrapped);
    }

    #[test]
    fn test_directory_entry_without_key() {
        let entry = DirectoryEntry {
            user_id: "carol".into(),
            public_key: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("null"));
        assert_eq!(serde_json::from_str::<DirectoryEntry>(&json).unwrap(), entry);

        let bad = r#"{ "user_id": "x", "public_key": "!!!" }"#;
        assert!(serde_json::from_str::<DirectoryEntry>(bad).is_err());
    }
}
