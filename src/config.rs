//! # Configuration
//!
//! Tunable parameters for key generation, backup key derivation and the
//! persistent key tier.
//!
//! | Field | Default | Bounds |
//! |-------|---------|--------|
//! | `rsa_key_bits` | 2048 | at least 2048 |
//! | `pbkdf2_iterations` | 100,000 | 100,000 to 1,000,000 |
//! | `salt_len` | 16 bytes | at least 16 bytes |
//! | `storage_path` | `None` (in-memory) | n/a |

use serde::{Deserialize, Serialize};

use crate::crypto::{
    MAX_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS, MIN_RSA_KEY_BITS, MIN_SALT_LEN,
};
use crate::error::{Error, Result};

/// Configuration for an [`E2eeContext`](crate::E2eeContext)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eeConfig {
    /// Modulus size for identity keypairs
    pub rsa_key_bits: usize,
    /// PBKDF2 work factor used when creating new backups
    pub pbkdf2_iterations: u32,
    /// Length of the random salt generated per backup, in bytes
    pub salt_len: usize,
    /// SQLite file for the persistent key tier (None for in-memory)
    pub storage_path: Option<String>,
}

impl Default for E2eeConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: MIN_RSA_KEY_BITS,
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            salt_len: MIN_SALT_LEN,
            storage_path: None,
        }
    }
}

impl E2eeConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("Malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters outside the accepted bounds
    pub fn validate(&self) -> Result<()> {
        if self.rsa_key_bits < MIN_RSA_KEY_BITS {
            return Err(Error::InvalidConfig(format!(
                "rsa_key_bits must be at least {} (got {})",
                MIN_RSA_KEY_BITS, self.rsa_key_bits
            )));
        }
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "pbkdf2_iterations must be at least {} (got {})",
                MIN_PBKDF2_ITERATIONS, self.pbkdf2_iterations
            )));
        }
        if self.pbkdf2_iterations > MAX_PBKDF2_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "pbkdf2_iterations must be at most {} (got {})",
                MAX_PBKDF2_ITERATIONS, self.pbkdf2_iterations
            )));
        }
        if self.salt_len < MIN_SALT_LEN {
            return Err(Error::InvalidConfig(format!(
                "salt_len must be at least {} bytes (got {})",
                MIN_SALT_LEN, self.salt_len
            )));
        }
        Ok(())
    }
}
