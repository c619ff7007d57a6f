use crate::derivation::random_array;
use crate::error::VaultError;
use crate::package::EncryptedPackage;
use crate::records::{DerivedKeyRecord, checksum};
use crate::types::{CIPHER_ALGORITHM, IV_LEN, KeyPurpose};
use aead::consts::U16;
use aead::inout::InOutBuf;
use aead::{AeadInOut, KeyInit, Nonce, Tag};
use aes_gcm::AesGcm;
use aes_gcm::aes::Aes256;
use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::debug;

/// AES-256-GCM with a 128-bit nonce.
pub(crate) type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Authenticated encryption under a single derived key.
///
/// The purpose string is the associated data, so a package only opens under the
/// purpose it was sealed for. Opening checks the ciphertext checksum first and the
/// AEAD tag second, reporting [`VaultError::Integrity`] and
/// [`VaultError::Authentication`] respectively.
#[derive(Debug)]
pub struct CipherEngine;

impl CipherEngine {
    /// Seals `plaintext` under `record` with a fresh random IV.
    ///
    /// # Errors
    /// * [`VaultError::Random`] if the IV cannot be drawn.
    /// * [`VaultError::Encryption`] if the cipher rejects the input.
    pub fn seal(record: &DerivedKeyRecord, plaintext: &[u8]) -> Result<EncryptedPackage, VaultError> {
        let purpose = record.purpose();
        let cipher = Self::cipher(record)?;
        let iv = random_array::<IV_LEN>()?;
        let nonce = Nonce::<Aes256Gcm16>::from(iv);

        let mut buf = plaintext.to_vec();
        let tag = cipher
            .encrypt_inout_detached(&nonce, purpose.as_str().as_bytes(), InOutBuf::from(&mut buf[..]))
            .map_err(|_| VaultError::Encryption {
                message: "Encryption failed".into(),
                context: Some(format!("AEAD seal for purpose '{purpose}'").into()),
            })?;

        debug!(purpose = %purpose, bytes = plaintext.len(), "Sealed package");
        Ok(EncryptedPackage {
            algorithm: CIPHER_ALGORITHM.to_owned(),
            key_type: purpose.as_str().to_owned(),
            iv: iv.to_vec(),
            tag: tag.to_vec(),
            checksum: checksum(&buf),
            ciphertext: buf,
            timestamp: Utc::now(),
        })
    }

    /// Opens `package` with `record`.
    ///
    /// `key_type` overrides the purpose recorded in the package and must match the
    /// record's purpose.
    ///
    /// # Errors
    /// * [`VaultError::InvalidPackage`] if the package shape is wrong.
    /// * [`VaultError::KeyNotFound`] if the resolved purpose is unknown or not `record`'s.
    /// * [`VaultError::Integrity`] if the ciphertext checksum does not match.
    /// * [`VaultError::Authentication`] if the tag does not verify.
    pub fn open(
        record: &DerivedKeyRecord,
        package: &EncryptedPackage,
        key_type: Option<KeyPurpose>,
    ) -> Result<Vec<u8>, VaultError> {
        let parts = package.validate(key_type)?;
        if parts.purpose != record.purpose() {
            return Err(VaultError::KeyNotFound {
                message: parts.purpose.as_str().into(),
                context: Some(format!("record belongs to '{}'", record.purpose()).into()),
            });
        }

        let actual = checksum(parts.ciphertext);
        if !bool::from(actual.as_bytes().ct_eq(parts.checksum.to_ascii_lowercase().as_bytes())) {
            return Err(VaultError::Integrity {
                message: "ciphertext checksum mismatch".into(),
                context: Some(format!("purpose '{}'", parts.purpose).into()),
            });
        }

        let cipher = Self::cipher(record)?;
        let nonce = Nonce::<Aes256Gcm16>::from(*parts.iv);
        let tag = Tag::<Aes256Gcm16>::from(*parts.tag);

        let mut buf = parts.ciphertext.to_vec();
        cipher
            .decrypt_inout_detached(
                &nonce,
                parts.purpose.as_str().as_bytes(),
                InOutBuf::from(&mut buf[..]),
                &tag,
            )
            .map_err(|_| VaultError::Authentication {
                message: "authentication tag mismatch".into(),
                context: Some(format!("purpose '{}'", parts.purpose).into()),
            })?;

        debug!(purpose = %parts.purpose, bytes = buf.len(), "Opened package");
        Ok(buf)
    }

    fn cipher(record: &DerivedKeyRecord) -> Result<Aes256Gcm16, VaultError> {
        Aes256Gcm16::new_from_slice(record.key().as_bytes()).map_err(|_| {
            VaultError::InvalidConfiguration {
                message: "derived key has the wrong length".into(),
                context: Some(record.purpose().as_str().into()),
            }
        })
    }
}
