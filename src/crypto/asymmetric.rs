//! # Key Wrapping
//!
//! RSA-OAEP encryption used to wrap a conversation session key for a single
//! recipient.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KEY WRAPPING                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SessionKey (32 bytes)                                                  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  RSA-OAEP(                                                              │
//! │    key      = recipient public key (RSA-2048),                          │
//! │    hash     = SHA-256,                                                  │
//! │    mgf1     = SHA-1,                                                    │
//! │    label    = empty                                                     │
//! │  )                                                                      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  Wrapped key (256 bytes for a 2048-bit modulus)                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The MGF1 digest is SHA-1 while the main digest is SHA-256. Hardware
//! keystores on mobile only accept that pairing, and both ends must agree or
//! every unwrap fails. Do not "upgrade" one side.

use rand::rngs::OsRng;
use rsa::Oaep;
use sha1::Sha1;
use sha2::Sha256;

use super::keys::{IdentityKeyPair, IdentityPublicKey};
use crate::error::{Error, Result};

/// SHA-256 output length, used in the OAEP overhead
const OAEP_HASH_LEN: usize = 32;

fn oaep() -> Oaep {
    Oaep::new_with_mgf_hash::<Sha256, Sha1>()
}

/// Largest plaintext OAEP-SHA256 can carry under `key`
///
/// 190 bytes for a 2048-bit modulus.
pub fn max_wrap_len(key: &IdentityPublicKey) -> usize {
    (key.bits() / 8).saturating_sub(2 * OAEP_HASH_LEN + 2)
}

/// `asymmetricEncrypt`: wrap `plaintext` for the holder of `public_key`
pub fn asymmetric_encrypt(plaintext: &[u8], public_key: &IdentityPublicKey) -> Result<Vec<u8>> {
    let limit = max_wrap_len(public_key);
    if plaintext.len() > limit {
        return Err(Error::EncryptionFailed(format!(
            "Plaintext of {} bytes exceeds the OAEP limit of {} bytes",
            plaintext.len(),
            limit
        )));
    }

    public_key
        .rsa_public()
        .encrypt(&mut OsRng, oaep(), plaintext)
        .map_err(|e| Error::EncryptionFailed(format!("RSA-OAEP: {}", e)))
}

/// `asymmetricDecrypt`: unwrap a ciphertext addressed to `keypair`
pub fn asymmetric_decrypt(ciphertext: &[u8], keypair: &IdentityKeyPair) -> Result<Vec<u8>> {
    keypair
        .rsa_private()
        .decrypt(oaep(), ciphertext)
        .map_err(|e| Error::DecryptionFailed(format!("RSA-OAEP: {}", e)))
}
