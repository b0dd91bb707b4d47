//! Field and file encryption for the forms store.
//!
//! Everything here uses AES-256-GCM with a 96-bit IV drawn from the OS
//! random source on every call. Keys come from a passphrase through scrypt
//! (N = 2^14, r = 8, p = 1) so records written by earlier deployments with
//! the same passphrase remain readable.
//!
//! - [`FieldCipher`] encrypts named fields of a JSON record into
//!   `ivhex:taghex:ciphertexthex` strings and decrypts them tolerantly.
//! - [`FileCipher`] seals whole files as `iv || tag || ciphertext` under a
//!   key scoped to backups.
//! - [`sensitive`] lists the columns of each table that are stored encrypted.

pub mod digest;
mod envelope;
mod error;
mod field;
mod file;
mod key;
pub mod sensitive;

pub use envelope::{Envelope, IV_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use field::{DecryptionReport, FieldCipher, FieldFailure, Record};
pub use file::FileCipher;
pub use key::{DerivedKey, FIELD_KEY_SALT, FILE_KEY_SALT, KEY_SIZE};
