//! AES-256-GCM sealing and the two serialized envelope forms.

use crate::{CryptoError, CryptoResult, DerivedKey};
use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm,
};
use rand::{rngs::OsRng, RngCore};

/// GCM IV size in bytes.
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// One sealed message: IV, detached tag and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Encrypt `plaintext` under `key` with a fresh random IV.
    pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<Self> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        Self::seal_with_iv(key, iv, plaintext)
    }

    pub(crate) fn seal_with_iv(
        key: &DerivedKey,
        iv: [u8; IV_SIZE],
        plaintext: &[u8],
    ) -> CryptoResult<Self> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);

        Ok(Self {
            iv,
            tag: tag_bytes,
            ciphertext: buffer,
        })
    }

    /// Authenticate and decrypt.
    pub fn open(&self, key: &DerivedKey) -> CryptoResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

        let mut buffer = self.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&self.iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&self.tag),
            )
            .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))?;

        Ok(buffer)
    }

    /// Serialize as `ivhex:taghex:ciphertexthex`.
    pub fn to_field_string(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }

    /// Parse `ivhex:taghex:ciphertexthex`.
    pub fn parse_field(value: &str) -> CryptoResult<Self> {
        let mut parts = value.split(':');
        let (Some(iv_hex), Some(tag_hex), Some(ct_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::InvalidEnvelope(
                "expected three colon-separated segments".to_string(),
            ));
        };

        let iv = decode_fixed::<IV_SIZE>(iv_hex, "iv")?;
        let tag = decode_fixed::<TAG_SIZE>(tag_hex, "tag")?;
        let ciphertext = hex::decode(ct_hex)
            .map_err(|e| CryptoError::InvalidEnvelope(format!("ciphertext: {e}")))?;

        Ok(Self {
            iv,
            tag,
            ciphertext,
        })
    }

    /// Serialize as `iv || tag || ciphertext`.
    pub fn to_file_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_SIZE + TAG_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `iv || tag || ciphertext`.
    pub fn from_file_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < IV_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidEnvelope(format!(
                "file envelope too short: {} bytes",
                bytes.len()
            )));
        }

        let (iv_bytes, rest) = bytes.split_at(IV_SIZE);
        let (tag_bytes, ciphertext) = rest.split_at(TAG_SIZE);

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(iv_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            iv,
            tag,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

fn decode_fixed<const N: usize>(segment: &str, name: &str) -> CryptoResult<[u8; N]> {
    let bytes =
        hex::decode(segment).map_err(|e| CryptoError::InvalidEnvelope(format!("{name}: {e}")))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::InvalidEnvelope(format!(
            "{}: expected {} bytes, got {}",
            name,
            N,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FIELD_KEY_SALT;

    const FIXED_IV: [u8; IV_SIZE] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

    fn legacy_key() -> DerivedKey {
        DerivedKey::derive("your-encryption-key", FIELD_KEY_SALT).unwrap()
    }

    #[test]
    fn seals_known_answer_ascii() {
        let sealed = Envelope::seal_with_iv(&legacy_key(), FIXED_IV, b"Ali Hassan").unwrap();
        assert_eq!(
            sealed.to_field_string(),
            "000102030405060708090a0b:b01f4ac3b2fd13149120dd6cd038c4f3:f64146d68e1aa32751c0"
        );
    }

    #[test]
    fn opens_known_answer_multibyte() {
        let envelope = Envelope::parse_field(
            "000102030405060708090a0b:58f3d90a49d0db61d0b4214f71e908da:\
             6ea8f7471ff808e610768c8b697fe2cdc2d92853997fda4a610febc6eff64fcaf15f",
        )
        .unwrap();
        let plaintext = envelope.open(&legacy_key()).unwrap();
        assert_eq!(String::from_utf8(plaintext).unwrap(), "مركز الدفاع المدني");
    }

    #[test]
    fn parse_rejects_wrong_segment_count() {
        assert!(matches!(
            Envelope::parse_field("aa:bb"),
            Err(CryptoError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            Envelope::parse_field("aa:bb:cc:dd"),
            Err(CryptoError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn parse_rejects_short_iv_and_bad_hex() {
        let short_iv = format!("{}:{}:00", "00".repeat(8), "00".repeat(TAG_SIZE));
        assert!(Envelope::parse_field(&short_iv).is_err());

        let bad_hex = format!("{}:{}:zz", "00".repeat(IV_SIZE), "00".repeat(TAG_SIZE));
        assert!(Envelope::parse_field(&bad_hex).is_err());
    }

    #[test]
    fn file_bytes_layout_is_iv_tag_ciphertext() {
        let sealed = Envelope::seal_with_iv(&legacy_key(), FIXED_IV, b"Ali Hassan").unwrap();
        let bytes = sealed.to_file_bytes();

        assert_eq!(&bytes[..IV_SIZE], &FIXED_IV);
        assert_eq!(&bytes[IV_SIZE..IV_SIZE + TAG_SIZE], &sealed.tag);
        assert_eq!(Envelope::from_file_bytes(&bytes).unwrap(), sealed);
    }

    #[test]
    fn from_file_bytes_rejects_truncated_input() {
        assert!(Envelope::from_file_bytes(&[0u8; IV_SIZE + TAG_SIZE - 1]).is_err());
    }

    #[test]
    fn open_fails_after_tag_flip() {
        let mut sealed = Envelope::seal(&legacy_key(), b"payload").unwrap();
        sealed.tag[0] ^= 0x01;
        assert!(matches!(
            sealed.open(&legacy_key()),
            Err(CryptoError::Decryption(_))
        ));
    }
}
