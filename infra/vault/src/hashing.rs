use crate::error::VaultError;
use hmac::{EagerHash, Hmac, KeyInit, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Digest used by [`generate_hash`] and the HMAC helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = VaultError;

    /// Accepts `sha256`, `SHA-256` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(VaultError::UnsupportedAlgorithm {
                message: s.to_owned().into(),
                context: Some("expected sha256, sha384 or sha512".into()),
            }),
        }
    }
}

/// One-shot digest of `data`, hex encoded.
#[must_use]
pub fn generate_hash(data: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        HashAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// HMAC of `data` under `key`, hex encoded.
///
/// # Errors
/// Returns [`VaultError::Internal`] if the MAC rejects the key.
pub fn generate_hmac(key: &[u8], data: &[u8], algorithm: HashAlgorithm) -> Result<String, VaultError> {
    compute_hmac(key, data, algorithm).map(hex::encode)
}

/// Recomputes the HMAC and compares it to `signature` in constant time.
///
/// A signature that is not hex or has the wrong length is simply `false`.
///
/// # Errors
/// Returns [`VaultError::Internal`] if the MAC rejects the key.
pub fn verify_hmac(
    key: &[u8],
    data: &[u8],
    signature: &str,
    algorithm: HashAlgorithm,
) -> Result<bool, VaultError> {
    let expected = compute_hmac(key, data, algorithm)?;
    let Ok(provided) = hex::decode(signature) else {
        return Ok(false);
    };
    Ok(bool::from(expected.ct_eq(&provided)))
}

fn compute_hmac(key: &[u8], data: &[u8], algorithm: HashAlgorithm) -> Result<Vec<u8>, VaultError> {
    match algorithm {
        HashAlgorithm::Sha256 => mac::<Sha256>(key, data),
        HashAlgorithm::Sha384 => mac::<Sha384>(key, data),
        HashAlgorithm::Sha512 => mac::<Sha512>(key, data),
    }
}

fn mac<D: EagerHash>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut mac = <Hmac<D> as KeyInit>::new_from_slice(key)
        .map_err(|_| VaultError::from("HMAC rejected key length"))?;
    Mac::update(&mut mac, data);
    Ok(mac.finalize().into_bytes().to_vec())
}
