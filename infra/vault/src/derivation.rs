use crate::error::VaultError;
use crate::pool::{TaskHandle, WorkerPool};
use crate::records::{DerivedKeyRecord, KeyMaterial, MasterKeyRecord};
use crate::types::{KEY_LEN, KeyPurpose, SALT_LEN};
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroize;

/// Purpose-scoped subkey derivation.
///
/// Every subkey is stretched from the master key with PBKDF2-HMAC-SHA-256 over
/// `salt ‖ purpose`, so two purposes never share a key even under the same salt.
/// Rotation re-derives from the unchanged master key, never from a previous subkey.
#[derive(Debug, Clone, Copy)]
pub struct KeyDerivation {
    iterations: u32,
}

impl KeyDerivation {
    #[must_use]
    pub const fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    #[must_use]
    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Derives a subkey for `purpose`. Draws a fresh salt when `salt` is `None`.
    ///
    /// Blocking and slow; use [`KeyDerivation::derive_key_async`] from async code.
    ///
    /// # Errors
    /// Returns [`VaultError::Random`] if a salt cannot be drawn.
    pub fn derive_key(
        &self,
        purpose: KeyPurpose,
        master: &MasterKeyRecord,
        salt: Option<[u8; SALT_LEN]>,
    ) -> Result<DerivedKeyRecord, VaultError> {
        let salt = match salt {
            Some(salt) => salt,
            None => random_array()?,
        };
        let key = self.stretch(master.key().as_bytes(), &salt, purpose.as_str().as_bytes());
        debug!(purpose = %purpose, "Derived subkey");
        Ok(DerivedKeyRecord::new(key, salt, purpose))
    }

    /// Queues a derivation on `pool`. The returned handle may be awaited or cancelled.
    pub fn derive_key_async(
        &self,
        pool: &WorkerPool,
        purpose: KeyPurpose,
        master: Arc<MasterKeyRecord>,
        salt: Option<[u8; SALT_LEN]>,
    ) -> TaskHandle<DerivedKeyRecord> {
        let this = *self;
        pool.spawn(move || this.derive_key(purpose, &master, salt))
    }

    /// Stretches `password` with `salt ‖ info` as the PBKDF2 salt.
    pub(crate) fn stretch(&self, password: &[u8], salt: &[u8], info: &[u8]) -> KeyMaterial {
        let mut input = Vec::with_capacity(salt.len() + info.len());
        input.extend_from_slice(salt);
        input.extend_from_slice(info);

        let mut out = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password, &input, self.iterations, &mut out);
        let key = KeyMaterial::new(out);
        out.zeroize();
        key
    }
}

/// Fills a fixed-size array from the system CSPRNG.
pub(crate) fn random_array<const N: usize>() -> Result<[u8; N], VaultError> {
    let mut buf = [0u8; N];
    getrandom::fill(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::checksum;

    const FAST: u32 = 1_000;

    fn master() -> MasterKeyRecord {
        MasterKeyRecord::new(KeyMaterial::new([42u8; KEY_LEN]), [0u8; SALT_LEN], FAST)
    }

    #[test]
    fn same_inputs_derive_same_key() {
        let kdf = KeyDerivation::new(FAST);
        let salt = [5u8; SALT_LEN];
        let a = kdf.derive_key(KeyPurpose::Data, &master(), Some(salt)).unwrap();
        let b = kdf.derive_key(KeyPurpose::Data, &master(), Some(salt)).unwrap();

        assert_eq!(a.key().as_bytes(), b.key().as_bytes());
        assert_eq!(a.salt(), &salt);
    }

    #[test]
    fn purposes_never_collide_under_one_salt() {
        let kdf = KeyDerivation::new(FAST);
        let salt = [5u8; SALT_LEN];
        let keys: Vec<_> = KeyPurpose::ALL
            .into_iter()
            .map(|p| kdf.derive_key(p, &master(), Some(salt)).unwrap().checksum().to_owned())
            .collect();

        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn fresh_salt_is_drawn_when_absent() {
        let kdf = KeyDerivation::new(FAST);
        let a = kdf.derive_key(KeyPurpose::Session, &master(), None).unwrap();
        let b = kdf.derive_key(KeyPurpose::Session, &master(), None).unwrap();

        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn derived_record_checksum_matches_key() {
        let kdf = KeyDerivation::new(FAST);
        let record = kdf.derive_key(KeyPurpose::Storage, &master(), None).unwrap();

        assert!(record.verify());
        assert_eq!(record.checksum(), checksum(record.key().as_bytes()));
        assert_eq!(record.purpose(), KeyPurpose::Storage);
    }

    #[test]
    fn stretch_matches_pbkdf2_over_salt_and_purpose() {
        let kdf = KeyDerivation::new(FAST);
        let salt = [1u8; SALT_LEN];
        let key = kdf.stretch(&[42u8; KEY_LEN], &salt, b"data");

        let mut input = salt.to_vec();
        input.extend_from_slice(b"data");
        let expected = pbkdf2::pbkdf2_hmac_array::<Sha256, KEY_LEN>(&[42u8; KEY_LEN], &input, FAST);
        assert_eq!(key.as_bytes(), &expected);
    }

    #[tokio::test]
    async fn async_derivation_runs_on_pool() {
        let pool = WorkerPool::new(1);
        let kdf = KeyDerivation::new(FAST);
        let record = kdf
            .derive_key_async(&pool, KeyPurpose::Application, Arc::new(master()), None)
            .await
            .unwrap();

        assert_eq!(record.purpose(), KeyPurpose::Application);
        assert!(record.verify());
    }
}
