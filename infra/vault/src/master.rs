use crate::config::CorruptionPolicy;
use crate::derivation::{KeyDerivation, random_array};
use crate::error::VaultError;
use crate::keystore::KeyStore;
use crate::pool::WorkerPool;
use crate::records::MasterKeyRecord;
use crate::types::{KDF_ALGORITHM, MASTER_SEED_LEN, SALT_LEN};
use std::sync::Arc;
use tracing::{error, info, warn};
use zeroize::Zeroize;

/// Loads, generates and verifies the single root key.
///
/// A master key that fails to load is never replaced silently: with
/// [`CorruptionPolicy::Fail`] initialization stops and the file is left as-is, with
/// [`CorruptionPolicy::Regenerate`] the file is preserved next to a new one.
#[derive(Debug)]
pub struct MasterKeyManager {
    store: Arc<KeyStore>,
    kdf: KeyDerivation,
    policy: CorruptionPolicy,
}

impl MasterKeyManager {
    #[must_use]
    pub const fn new(store: Arc<KeyStore>, iterations: u32, policy: CorruptionPolicy) -> Self {
        Self { store, kdf: KeyDerivation::new(iterations), policy }
    }

    #[must_use]
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Loads the persisted master key, generating and persisting one if none exists.
    ///
    /// # Errors
    /// * [`VaultError::Integrity`] (or a decoding error) if the file is corrupt and the
    ///   policy is [`CorruptionPolicy::Fail`].
    /// * [`VaultError::KeyStoreIo`] if the key store cannot be read or written.
    /// * [`VaultError::Random`] if the system RNG is unavailable.
    pub async fn initialize(&self, pool: &WorkerPool) -> Result<Arc<MasterKeyRecord>, VaultError> {
        self.store.ensure().await?;

        let Some(bytes) = self.store.read_master_key().await? else {
            info!(path = %self.store.master_key_path().display(), "No master key found, generating");
            return self.generate(pool).await;
        };

        match MasterKeyRecord::from_json(&bytes) {
            Ok(record) => {
                info!(checksum = %record.checksum(), created = %record.created(), "Master key loaded");
                Ok(Arc::new(record))
            },
            Err(err) => self.recover(err, pool).await,
        }
    }

    async fn recover(
        &self,
        err: VaultError,
        pool: &WorkerPool,
    ) -> Result<Arc<MasterKeyRecord>, VaultError> {
        match self.policy {
            CorruptionPolicy::Fail => {
                error!(
                    kind = err.kind(),
                    error = %err,
                    path = %self.store.master_key_path().display(),
                    "Master key is corrupt; refusing to start"
                );
                Err(err)
            },
            CorruptionPolicy::Regenerate => {
                let preserved = self.store.quarantine_master_key().await?;
                warn!(
                    kind = err.kind(),
                    error = %err,
                    preserved = %preserved.display(),
                    "Master key is corrupt; generating a new one. Data sealed under the old key is unreadable"
                );
                self.generate(pool).await
            },
        }
    }

    async fn generate(&self, pool: &WorkerPool) -> Result<Arc<MasterKeyRecord>, VaultError> {
        let kdf = self.kdf;
        let record = pool.run(move || generate_record(kdf)).await?;
        self.store.write_master_key(&record.to_json()?).await?;

        info!(
            checksum = %record.checksum(),
            algorithm = KDF_ALGORITHM,
            iterations = record.iterations(),
            "Master key generated"
        );
        Ok(Arc::new(record))
    }
}

/// Stretches 64 random bytes under a fresh salt into a 32-byte root key.
fn generate_record(kdf: KeyDerivation) -> Result<MasterKeyRecord, VaultError> {
    let mut seed = random_array::<MASTER_SEED_LEN>()?;
    let salt = random_array::<SALT_LEN>()?;
    let key = kdf.stretch(&seed, &salt, &[]);
    seed.zeroize();
    Ok(MasterKeyRecord::new(key, salt, kdf.iterations()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FAST: u32 = 1_000;

    fn manager(root: &std::path::Path, policy: CorruptionPolicy) -> MasterKeyManager {
        MasterKeyManager::new(Arc::new(KeyStore::new(root)), FAST, policy)
    }

    #[tokio::test]
    async fn first_initialize_creates_key_file() {
        let tmp = tempdir().unwrap();
        let pool = WorkerPool::new(1);
        let mgr = manager(tmp.path(), CorruptionPolicy::Fail);

        let record = mgr.initialize(&pool).await.unwrap();

        assert!(mgr.store().master_key_path().exists());
        assert!(record.verify());
        assert_eq!(record.iterations(), FAST);
    }

    #[tokio::test]
    async fn second_manager_loads_identical_key() {
        let tmp = tempdir().unwrap();
        let pool = WorkerPool::new(1);

        let first = manager(tmp.path(), CorruptionPolicy::Fail).initialize(&pool).await.unwrap();
        let second = manager(tmp.path(), CorruptionPolicy::Fail).initialize(&pool).await.unwrap();

        assert_eq!(first.key().as_bytes(), second.key().as_bytes());
        assert_eq!(first.salt(), second.salt());
        assert_eq!(first.checksum(), second.checksum());
    }

    #[tokio::test]
    async fn corrupt_key_fails_and_leaves_file_untouched() {
        let tmp = tempdir().unwrap();
        let pool = WorkerPool::new(1);
        let mgr = manager(tmp.path(), CorruptionPolicy::Fail);
        mgr.initialize(&pool).await.unwrap();

        let path = mgr.store().master_key_path();
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        value["checksum"] = serde_json::Value::String("ff".repeat(32));
        let corrupted = serde_json::to_vec(&value).unwrap();
        std::fs::write(&path, &corrupted).unwrap();

        let err = mgr.initialize(&pool).await.unwrap_err();

        assert!(matches!(err, VaultError::Integrity { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), corrupted);
    }

    #[tokio::test]
    async fn unparsable_key_fails_without_regeneration() {
        let tmp = tempdir().unwrap();
        let pool = WorkerPool::new(1);
        let mgr = manager(tmp.path(), CorruptionPolicy::Fail);
        mgr.store().ensure().await.unwrap();
        std::fs::write(mgr.store().master_key_path(), b"not json").unwrap();

        let err = mgr.initialize(&pool).await.unwrap_err();

        assert!(matches!(err, VaultError::Serialization { .. }));
        assert_eq!(std::fs::read(mgr.store().master_key_path()).unwrap(), b"not json");
    }

    #[tokio::test]
    async fn regenerate_policy_preserves_corrupt_file() {
        let tmp = tempdir().unwrap();
        let pool = WorkerPool::new(1);
        let mgr = manager(tmp.path(), CorruptionPolicy::Regenerate);
        mgr.store().ensure().await.unwrap();
        std::fs::write(mgr.store().master_key_path(), b"not json").unwrap();

        let record = mgr.initialize(&pool).await.unwrap();

        assert!(record.verify());
        let preserved: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("master.key.corrupt-"))
            .collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(std::fs::read(preserved[0].path()).unwrap(), b"not json");
    }
}
