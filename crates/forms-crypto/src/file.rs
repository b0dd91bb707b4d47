//! Whole-file encryption for backup artifacts.

use crate::{CryptoResult, DerivedKey, Envelope, FILE_KEY_SALT};

/// Seals whole files as `iv || tag || ciphertext`.
///
/// The key is derived with its own salt, so a backup key never equals the
/// field key even when both come from the same passphrase.
#[derive(Clone)]
pub struct FileCipher {
    key: DerivedKey,
}

impl FileCipher {
    pub fn new(passphrase: &str) -> CryptoResult<Self> {
        Ok(Self::with_key(DerivedKey::derive(passphrase, FILE_KEY_SALT)?))
    }

    pub fn with_key(key: DerivedKey) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(Envelope::seal(&self.key, plaintext)?.to_file_bytes())
    }

    pub fn decrypt(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        Envelope::from_file_bytes(sealed)?.open(&self.key)
    }
}

impl std::fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCipher").finish_non_exhaustive()
    }
}
