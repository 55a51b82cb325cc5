//! # Key Types
//!
//! Identity keypairs (RSA) and conversation session keys (AES-256).
//!
//! ## Key Types Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           KEY TYPES                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  IdentityKeyPair (RSA-2048)                                     │   │
//! │  │  ──────────────────────────                                      │   │
//! │  │                                                                  │   │
//! │  │  Private half: lives inside an IdentityKeyContainer only        │   │
//! │  │  Public half:  published to the directory (SPKI DER)            │   │
//! │  │  Purpose:      unwrap session keys addressed to this user        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SessionKey (AES-256)                                           │   │
//! │  │  ────────────────────                                            │   │
//! │  │                                                                  │   │
//! │  │  32 random bytes shared by every participant of a conversation. │   │
//! │  │  Transmitted only wrapped under a recipient's public key.        │   │
//! │  │  Canonical encoding: the raw 32 bytes.                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use super::encryption::{EncryptionKey, KEY_SIZE};
use crate::error::{Error, Result};

/// Size of a session key in bytes (256 bits)
pub const SESSION_KEY_SIZE: usize = KEY_SIZE;

/// RSA identity keypair
///
/// The private key zeroizes itself on drop (handled by the `rsa` crate).
/// Outside of the key container this type should not be held longer than a
/// single operation.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: RsaPrivateKey,
}

impl IdentityKeyPair {
    /// Generate a new random keypair with a modulus of `bits`
    ///
    /// Uses the operating system's secure random number generator.
    pub fn generate(bits: usize) -> Result<Self> {
        let secret = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::KeyGenerationFailed(format!("RSA-{}: {}", bits, e)))?;
        Ok(Self { secret })
    }

    /// Get the public half
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(RsaPublicKey::from(&self.secret))
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.secret.size() * 8
    }

    /// Serialize the private key as PKCS#8 DER
    ///
    /// ## Security Warning
    ///
    /// Only the key container may call this, to persist the key into an
    /// encrypted store. Never log or transmit these bytes.
    pub(crate) fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self
            .secret
            .to_pkcs8_der()
            .map_err(|e| Error::InvalidKey(format!("PKCS#8 encoding failed: {}", e)))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Parse a private key from PKCS#8 DER
    pub(crate) fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let secret = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| Error::InvalidKey(format!("Invalid PKCS#8 private key: {}", e)))?;
        Ok(Self { secret })
    }

    pub(crate) fn rsa_private(&self) -> &RsaPrivateKey {
        &self.secret
    }
}

// Prevent accidental logging
impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKeyPair(RSA-{}, [REDACTED])", self.bits())
    }
}

/// `generateAsymmetricKeyPair`
pub fn generate_asymmetric_key_pair(bits: usize) -> Result<IdentityKeyPair> {
    IdentityKeyPair::generate(bits)
}

/// RSA public key of an identity
///
/// Safe to share, serialize and log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityPublicKey(RsaPublicKey);

impl IdentityPublicKey {
    /// Encode as SubjectPublicKeyInfo DER (the directory's interchange format)
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .0
            .to_public_key_der()
            .map_err(|e| Error::InvalidKey(format!("SPKI encoding failed: {}", e)))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Decode from SubjectPublicKeyInfo DER
    pub fn from_der(der: &[u8]) -> Result<Self> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| Error::InvalidKey(format!("Invalid public key: {}", e)))
    }

    /// Encode as base64 SPKI DER (for JSON transport)
    pub fn to_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_der()?))
    }

    /// Decode from base64 SPKI DER
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let der = STANDARD.decode(encoded)?;
        Self::from_der(&der)
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    pub(crate) fn rsa_public(&self) -> &RsaPublicKey {
        &self.0
    }
}

/// A conversation session key
///
/// 256 random bits shared by every participant of one conversation.
/// Zeroized on drop; `Debug` never prints the key.
#[derive(Clone)]
pub struct SessionKey(EncryptionKey);

impl SessionKey {
    /// `generateSymmetricKey`: 256 bits from the OS CSPRNG
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(EncryptionKey::from_bytes(*bytes))
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(EncryptionKey::from_bytes(bytes))
    }

    /// Create from a slice, checking the length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SESSION_KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "Session key must be {} bytes (got {})",
                SESSION_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(array))
    }

    /// The raw key bytes
    ///
    /// ## Security Warning
    ///
    /// Only wrap, encrypt-at-rest or back up these bytes. Never log them.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// The AES-256-GCM key used for message payloads
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.0
    }

    /// Short fingerprint for logs
    pub fn fingerprint(&self) -> String {
        super::kdf::key_fingerprint(self.as_bytes())
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SessionKey {}

// Prevent accidental logging
impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

// ============================================================================
// CANONICAL ENCODING
// ============================================================================

/// `encodeKey` for public keys: SPKI DER
pub fn encode_public_key(key: &IdentityPublicKey) -> Result<Vec<u8>> {
    key.to_der()
}

/// `decodeKey` for public keys
pub fn decode_public_key(der: &[u8]) -> Result<IdentityPublicKey> {
    IdentityPublicKey::from_der(der)
}

/// `encodeKey` for session keys: the raw 32 bytes
pub fn encode_session_key(key: &SessionKey) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(key.as_bytes().to_vec())
}

/// `decodeKey` for session keys
pub fn decode_session_key(bytes: &[u8]) -> Result<SessionKey> {
    SessionKey::from_slice(bytes)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_are_random() {
        let k1 = SessionKey::generate();
        let k2 = SessionKey::generate();
        assert_ne!(k1, k2);
        assert_ne!(k1.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_session_key_encoding() {
        let key = SessionKey::generate();
        let encoded = encode_session_key(&key);
        assert_eq!(encoded.len(), 32);

        let decoded = decode_session_key(&encoded).unwrap();
        assert_eq!(key, decoded);

        assert!(decode_session_key(&[0u8; 31]).is_err());
        assert!(decode_session_key(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_session_key_debug_redacts() {
        let key = SessionKey::from_bytes([0x11; 32]);
        assert_eq!(format!("{:?}", key), "SessionKey([REDACTED])");
    }

    #[test]
    fn test_identity_keypair_generation() {
        let kp = generate_asymmetric_key_pair(2048).unwrap();
        assert_eq!(kp.bits(), 2048);
        assert_eq!(kp.public_key().bits(), 2048);
        assert!(format!("{:?}", kp).contains("REDACTED"));
    }

    #[test]
    fn test_public_key_encoding() {
        let kp = IdentityKeyPair::generate(2048).unwrap();
        let public = kp.public_key();

        let der = encode_public_key(&public).unwrap();
        assert_eq!(decode_public_key(&der).unwrap(), public);

        let b64 = public.to_base64().unwrap();
        assert_eq!(IdentityPublicKey::from_base64(&b64).unwrap(), public);

        assert!(decode_public_key(b"not a key").is_err());
    }

    #[test]
    fn test_private_key_pkcs8() {
        let kp = IdentityKeyPair::generate(2048).unwrap();
        let der = kp.to_pkcs8_der().unwrap();
        let restored = IdentityKeyPair::from_pkcs8_der(&der).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }
}
