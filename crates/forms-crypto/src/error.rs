//! Crypto error types.

use thiserror::Error;

/// Crypto error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A value could not be encrypted. The record must not be persisted.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Authentication failed or the plaintext is unusable.
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// The input is not a well-formed envelope.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The key could not be derived from the passphrase.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),
}

/// Result type alias using CryptoError.
pub type CryptoResult<T> = Result<T, CryptoError>;
