use crate::error::{VaultError, VaultErrorExt};
use crate::types::{CIPHER_ALGORITHM, IV_LEN, KeyPurpose, TAG_LEN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A self-describing AES-256-GCM ciphertext.
///
/// Serialized as one JSON object:
///
/// ```text
/// {"algorithm":"aes-256-gcm","keyType":"data","iv":<b64>,"tag":<b64>,
///  "data":<b64>,"timestamp":<ISO-8601>,"checksum":<hex sha-256 of data>}
/// ```
///
/// A package is only meaningful as a whole; [`EncryptedPackage::validate`] checks
/// every field before any key is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPackage {
    pub algorithm: String,
    pub key_type: String,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    #[serde(rename = "data", with = "b64")]
    pub ciphertext: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
}

/// Borrowed view of a package that passed shape validation.
#[derive(Debug)]
pub(crate) struct ValidatedPackage<'a> {
    pub(crate) purpose: KeyPurpose,
    pub(crate) iv: &'a [u8; IV_LEN],
    pub(crate) tag: &'a [u8; TAG_LEN],
    pub(crate) ciphertext: &'a [u8],
    pub(crate) checksum: &'a str,
}

impl EncryptedPackage {
    /// Checks algorithm, lengths and checksum format, and resolves the purpose.
    ///
    /// `key_type` overrides the purpose recorded in the package.
    pub(crate) fn validate(
        &self,
        key_type: Option<KeyPurpose>,
    ) -> Result<ValidatedPackage<'_>, VaultError> {
        if self.algorithm != CIPHER_ALGORITHM {
            return Err(VaultError::invalid_package(format!(
                "unsupported algorithm '{}'",
                self.algorithm
            )));
        }
        let iv: &[u8; IV_LEN] = self.iv.as_slice().try_into().map_err(|_| {
            VaultError::invalid_package(format!("iv must be {IV_LEN} bytes, got {}", self.iv.len()))
        })?;
        let tag: &[u8; TAG_LEN] = self.tag.as_slice().try_into().map_err(|_| {
            VaultError::invalid_package(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                self.tag.len()
            ))
        })?;
        if self.checksum.len() != 64 || !self.checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VaultError::invalid_package("checksum must be 64 hex characters"));
        }
        let purpose = match key_type {
            Some(purpose) => purpose,
            None => self.key_type.parse()?,
        };

        Ok(ValidatedPackage { purpose, iv, tag, ciphertext: &self.ciphertext, checksum: &self.checksum })
    }

    /// Encodes the package as its JSON wire format.
    ///
    /// # Errors
    /// Returns [`VaultError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, VaultError> {
        serde_json::to_string(self).context("Encoding encrypted package")
    }

    /// Decodes a package from its JSON wire format.
    ///
    /// # Errors
    /// Returns [`VaultError::InvalidPackage`] if the text is not a complete package.
    pub fn from_json(text: &str) -> Result<Self, VaultError> {
        serde_json::from_str(text).map_err(|err| VaultError::InvalidPackage {
            message: err.to_string().into(),
            context: Some("Decoding encrypted package".into()),
        })
    }
}

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedPackage {
        EncryptedPackage {
            algorithm: CIPHER_ALGORITHM.to_owned(),
            key_type: "data".to_owned(),
            iv: vec![1; IV_LEN],
            tag: vec![2; TAG_LEN],
            ciphertext: b"opaque".to_vec(),
            timestamp: Utc::now(),
            checksum: crate::records::checksum(b"opaque"),
        }
    }

    #[test]
    fn wire_format_uses_documented_names() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["algorithm"], "aes-256-gcm");
        assert_eq!(value["keyType"], "data");
        assert_eq!(value["iv"], "AQEBAQEBAQEBAQEBAQEBAQ==");
        assert_eq!(value["data"], "b3BhcXVl");
        assert!(value.get("ciphertext").is_none());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn json_text_restores_the_same_package() {
        let package = sample();
        let restored = EncryptedPackage::from_json(&package.to_json().unwrap()).unwrap();
        assert_eq!(package, restored);
    }

    #[test]
    fn missing_field_is_invalid_package() {
        let mut value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("tag");

        let err = EncryptedPackage::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, VaultError::InvalidPackage { .. }));
    }

    #[test]
    fn validate_rejects_wrong_shapes() {
        let mut wrong_alg = sample();
        wrong_alg.algorithm = "aes-128-cbc".to_owned();
        assert!(matches!(wrong_alg.validate(None), Err(VaultError::InvalidPackage { .. })));

        let mut short_iv = sample();
        short_iv.iv.truncate(12);
        assert!(matches!(short_iv.validate(None), Err(VaultError::InvalidPackage { .. })));

        let mut bad_checksum = sample();
        bad_checksum.checksum = "xyz".to_owned();
        assert!(matches!(bad_checksum.validate(None), Err(VaultError::InvalidPackage { .. })));
    }

    #[test]
    fn validate_resolves_purpose_and_override() {
        let package = sample();
        assert_eq!(package.validate(None).unwrap().purpose, KeyPurpose::Data);
        assert_eq!(
            package.validate(Some(KeyPurpose::Session)).unwrap().purpose,
            KeyPurpose::Session
        );

        let mut unknown = sample();
        unknown.key_type = "ledger".to_owned();
        assert!(matches!(unknown.validate(None), Err(VaultError::KeyNotFound { .. })));
    }
}
