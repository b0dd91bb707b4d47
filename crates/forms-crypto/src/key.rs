//! Passphrase-based key derivation.

use crate::{CryptoError, CryptoResult};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Salt for field keys. Constant so the same passphrase always yields the
/// same key as previously written records.
pub const FIELD_KEY_SALT: &[u8] = b"salt";

/// Salt for backup file keys.
pub const FILE_KEY_SALT: &[u8] = b"forms-backup-file-v1";

// scrypt cost parameters: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// A 256-bit key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Derive a key from `passphrase` and `salt` with scrypt.
    pub fn derive(passphrase: &str, salt: &[u8]) -> CryptoResult<Self> {
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let mut bytes = [0u8; KEY_SIZE];
        scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut bytes)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self { bytes })
    }

    /// Use raw key bytes directly.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::KeyDerivation(format!(
                "Invalid key size: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Raw key bytes. Never log these.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(**redacted**)")
    }
}
