//! Key records and their on-disk representation.
//!
//! Records are immutable once constructed. Rotation replaces a record wholesale
//! behind an [`Arc`](std::sync::Arc), which is what lets readers observe either the
//! whole old key or the whole new one.

use crate::error::{VaultError, VaultErrorExt};
use crate::types::{KDF_ALGORITHM, KEY_LEN, KeyPurpose, MASTER_KEY_VERSION, SALT_LEN};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Hex SHA-256 of `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn checksum_matches(bytes: &[u8], expected: &str) -> bool {
    bool::from(checksum(bytes).as_bytes().ct_eq(expected.as_bytes()))
}

/// 32 bytes of secret key material, wiped on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub(crate) const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::integrity(format!("key must be {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub(crate) const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

// --- Master key ---

/// The single root key. Owned by [`crate::MasterKeyManager`].
#[derive(Debug, Clone)]
pub struct MasterKeyRecord {
    key: KeyMaterial,
    salt: [u8; SALT_LEN],
    algorithm: String,
    iterations: u32,
    created: DateTime<Utc>,
    version: u32,
    checksum: String,
}

impl MasterKeyRecord {
    pub(crate) fn new(key: KeyMaterial, salt: [u8; SALT_LEN], iterations: u32) -> Self {
        let checksum = checksum(key.as_bytes());
        Self {
            key,
            salt,
            algorithm: KDF_ALGORITHM.to_owned(),
            iterations,
            created: Utc::now(),
            version: MASTER_KEY_VERSION,
            checksum,
        }
    }

    pub(crate) const fn key(&self) -> &KeyMaterial {
        &self.key
    }

    #[must_use]
    pub const fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    #[must_use]
    pub const fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Hex SHA-256 of the key bytes. Safe to log; identifies the key without revealing it.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Recomputes the key checksum and compares it to the stored one.
    #[must_use]
    pub fn verify(&self) -> bool {
        checksum_matches(self.key.as_bytes(), &self.checksum)
    }

    /// Encodes the record as the `master.key` JSON document.
    ///
    /// # Errors
    /// Returns [`VaultError::Serialization`] if JSON encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>, VaultError> {
        let file = MasterKeyFile {
            key: STANDARD.encode(self.key.as_bytes()),
            salt: STANDARD.encode(self.salt),
            algorithm: self.algorithm.clone(),
            iterations: self.iterations,
            created: self.created,
            version: self.version,
            checksum: self.checksum.clone(),
        };
        serde_json::to_vec_pretty(&file).context("Encoding master key record")
    }

    /// Decodes and verifies a `master.key` JSON document.
    ///
    /// # Errors
    /// * [`VaultError::Serialization`] if the document is not valid JSON of the expected shape.
    /// * [`VaultError::Encoding`] if `key` or `salt` are not valid base64.
    /// * [`VaultError::Integrity`] on wrong lengths, unknown algorithm or version, or a
    ///   checksum that does not match the key bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, VaultError> {
        let file: MasterKeyFile =
            serde_json::from_slice(bytes).context("Decoding master key record")?;

        if file.algorithm != KDF_ALGORITHM {
            return Err(VaultError::integrity(format!("unknown algorithm '{}'", file.algorithm)));
        }
        if file.version != MASTER_KEY_VERSION {
            return Err(VaultError::integrity(format!("unsupported version {}", file.version)));
        }
        if file.iterations == 0 {
            return Err(VaultError::integrity("iterations cannot be zero"));
        }

        let mut raw_key = STANDARD.decode(&file.key).context("Decoding master key")?;
        let key = KeyMaterial::from_slice(&raw_key);
        raw_key.zeroize();
        let key = key?;

        let raw_salt = STANDARD.decode(&file.salt).context("Decoding master salt")?;
        let salt: [u8; SALT_LEN] = raw_salt.as_slice().try_into().map_err(|_| {
            VaultError::integrity(format!("salt must be {SALT_LEN} bytes, got {}", raw_salt.len()))
        })?;

        let record = Self {
            key,
            salt,
            algorithm: file.algorithm.clone(),
            iterations: file.iterations,
            created: file.created,
            version: file.version,
            checksum: file.checksum.clone(),
        };

        if !record.verify() {
            return Err(VaultError::Integrity {
                message: "master key checksum mismatch".into(),
                context: Some(format!("stored checksum {}", file.checksum).into()),
            });
        }
        Ok(record)
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct MasterKeyFile {
    key: String,
    salt: String,
    algorithm: String,
    iterations: u32,
    #[zeroize(skip)]
    created: DateTime<Utc>,
    version: u32,
    checksum: String,
}

// --- Derived keys ---

/// A purpose-scoped subkey derived from the master key.
#[derive(Debug)]
pub struct DerivedKeyRecord {
    key: KeyMaterial,
    salt: [u8; SALT_LEN],
    purpose: KeyPurpose,
    created: DateTime<Utc>,
    checksum: String,
}

impl DerivedKeyRecord {
    pub(crate) fn new(key: KeyMaterial, salt: [u8; SALT_LEN], purpose: KeyPurpose) -> Self {
        let checksum = checksum(key.as_bytes());
        Self { key, salt, purpose, created: Utc::now(), checksum }
    }

    pub(crate) const fn key(&self) -> &KeyMaterial {
        &self.key
    }

    #[must_use]
    pub const fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    #[must_use]
    pub const fn purpose(&self) -> KeyPurpose {
        self.purpose
    }

    #[must_use]
    pub const fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    #[must_use]
    pub fn verify(&self) -> bool {
        checksum_matches(self.key.as_bytes(), &self.checksum)
    }
}

/// A superseded derived key, kept for audit only. Never used to decrypt.
#[derive(Debug, Clone)]
pub struct KeyHistoryEntry {
    record: Arc<DerivedKeyRecord>,
    rotated_at: DateTime<Utc>,
}

impl KeyHistoryEntry {
    pub(crate) fn new(record: Arc<DerivedKeyRecord>) -> Self {
        Self { record, rotated_at: Utc::now() }
    }

    #[must_use]
    pub fn record(&self) -> &DerivedKeyRecord {
        &self.record
    }

    #[must_use]
    pub const fn rotated_at(&self) -> DateTime<Utc> {
        self.rotated_at
    }
}
