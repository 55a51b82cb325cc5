//! # Cryptography Module
//!
//! All cryptographic primitives used by the end-to-end encryption core. No
//! other module touches a cipher directly.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 HYBRID KEY DISTRIBUTION                         │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Conversation setup:                                           │   │
//! │  │                                                                 │   │
//! │  │     SessionKey (AES-256, random)                               │   │
//! │  │            │                                                    │   │
//! │  │     ┌──────┼──────────────┐                                    │   │
//! │  │     ▼      ▼              ▼                                    │   │
//! │  │   RSA-OAEP(pk_A)  RSA-OAEP(pk_B)  RSA-OAEP(pk_C)               │   │
//! │  │     │      │              │                                    │   │
//! │  │     ▼      ▼              ▼                                    │   │
//! │  │   WrappedSessionKey, one per participant                       │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 MESSAGE ENCRYPTION                              │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  AES-256-GCM                                                   │   │
//! │  │  • 256-bit session key                                         │   │
//! │  │  • 96-bit IV (random per message)                              │   │
//! │  │  • 128-bit authentication tag                                  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 BACKUP PROTECTION                               │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  PIN ──PBKDF2-HMAC-SHA256 (≥100k rounds, ≥128-bit salt)──► key │   │
//! │  │  key ──AES-256-GCM──► encrypted backup blob                    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | RSA-2048 OAEP (SHA-256, MGF1-SHA-1) | Session key wrapping |
//! | AES-256-GCM | Messages, backups, data at rest |
//! | PBKDF2-HMAC-SHA256 | PIN to backup key |
//! | HKDF-SHA256 | Device secret to storage key |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: session keys and derived keys are zeroized on drop
//! 2. **Secure Random**: all randomness comes from `rand::rngs::OsRng`
//! 3. **No Nonce Reuse**: a fresh IV for every encryption call
//! 4. **No Key Logging**: secret types have redacted `Debug` impls

mod asymmetric;
mod encryption;
mod kdf;
mod keys;

pub use asymmetric::{asymmetric_decrypt, asymmetric_encrypt, max_wrap_len};
pub use encryption::{
    authenticated_decrypt, authenticated_encrypt, decrypt, encrypt, EncryptionKey, Nonce,
    KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use kdf::{
    derive_key_from_password, derive_storage_key, generate_salt, key_fingerprint,
};
pub use keys::{
    decode_public_key, decode_session_key, encode_public_key, encode_session_key,
    generate_asymmetric_key_pair, IdentityKeyPair, IdentityPublicKey, SessionKey,
    SESSION_KEY_SIZE,
};

/// Smallest accepted RSA modulus, in bits
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// Smallest accepted PBKDF2 iteration count
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Largest PBKDF2 iteration count accepted from config or a backup blob
pub const MAX_PBKDF2_ITERATIONS: u32 = 10 * MIN_PBKDF2_ITERATIONS;

/// Smallest accepted salt length, in bytes (128 bits)
pub const MIN_SALT_LEN: usize = 16;
