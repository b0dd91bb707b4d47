//! Selective encryption of named record fields.

use crate::{CryptoError, CryptoResult, DerivedKey, Envelope, FIELD_KEY_SALT};
use serde_json::{Map, Value};
use tracing::warn;

/// A record as read from or written to the store: column name to value.
pub type Record = Map<String, Value>;

/// A field that could not be decrypted and was left as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: String,
    pub error: CryptoError,
}

/// Fields of one record that failed to decrypt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptionReport {
    pub failures: Vec<FieldFailure>,
}

impl DecryptionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Encrypts and decrypts named fields with one process-lifetime key.
#[derive(Clone)]
pub struct FieldCipher {
    key: DerivedKey,
}

impl FieldCipher {
    /// Derive the field key from `passphrase` and the fixed field salt.
    pub fn new(passphrase: &str) -> CryptoResult<Self> {
        Ok(Self::with_key(DerivedKey::derive(passphrase, FIELD_KEY_SALT)?))
    }

    pub fn with_key(key: DerivedKey) -> Self {
        Self { key }
    }

    /// Encrypt one string into a field envelope.
    pub fn encrypt_value(&self, plaintext: &str) -> CryptoResult<String> {
        Ok(Envelope::seal(&self.key, plaintext.as_bytes())?.to_field_string())
    }

    /// Decrypt one field envelope.
    pub fn decrypt_value(&self, envelope: &str) -> CryptoResult<String> {
        let plaintext = Envelope::parse_field(envelope)?.open(&self.key)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    /// Return a copy of `record` with each named, present, non-empty field
    /// replaced by its envelope.
    ///
    /// Falsy scalars (`0`, `false`) are left as stored, like null and the
    /// empty string. Other numbers and booleans are encrypted from their
    /// JSON text. Arrays and
    /// objects are rejected, and nothing is returned for a record with any
    /// rejected field.
    pub fn encrypt_fields(&self, record: &Record, fields: &[&str]) -> CryptoResult<Record> {
        let mut out = record.clone();

        for &field in fields {
            let Some(value) = out.get_mut(field) else {
                continue;
            };

            let plaintext = match value {
                Value::Null => continue,
                Value::String(s) if s.is_empty() => continue,
                Value::Bool(false) => continue,
                Value::Number(n) if n.as_f64() == Some(0.0) => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(CryptoError::Encryption(format!(
                        "field '{field}' holds a structured value and cannot be encrypted"
                    )));
                }
            };

            *value = Value::String(self.encrypt_value(&plaintext)?);
        }

        Ok(out)
    }

    /// Return a copy of `record` with each named field decrypted.
    ///
    /// Never fails: a field that does not decrypt keeps its stored value.
    pub fn decrypt_fields(&self, record: &Record, fields: &[&str]) -> Record {
        self.decrypt_fields_with_report(record, fields).0
    }

    /// Like [`decrypt_fields`](Self::decrypt_fields), also returning which
    /// fields failed and why.
    pub fn decrypt_fields_with_report(
        &self,
        record: &Record,
        fields: &[&str],
    ) -> (Record, DecryptionReport) {
        let mut out = record.clone();
        let mut report = DecryptionReport::default();

        for &field in fields {
            let Some(Value::String(stored)) = out.get_mut(field) else {
                continue;
            };
            if stored.is_empty() {
                continue;
            }

            match self.decrypt_value(stored) {
                Ok(plaintext) => *stored = plaintext,
                Err(error) => {
                    warn!(field, error = %error, "Field left undecrypted");
                    report.failures.push(FieldFailure {
                        field: field.to_string(),
                        error,
                    });
                }
            }
        }

        (out, report)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
