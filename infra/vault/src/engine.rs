use crate::builder::KeyEngineBuilder;
use crate::cipher::CipherEngine;
use crate::config::EngineConfig;
use crate::derivation::KeyDerivation;
use crate::error::{VaultError, VaultErrorExt};
use crate::hashing::{self, HashAlgorithm};
use crate::keyring::Keyring;
use crate::keystore::KeyStore;
use crate::master::MasterKeyManager;
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::notify::{KeyEvent, Notifier, SubscriptionId};
use crate::package::EncryptedPackage;
use crate::pool::{TaskHandle, WorkerPool};
use crate::records::{DerivedKeyRecord, KeyHistoryEntry, MasterKeyRecord};
use crate::rotation::{KeyRotationScheduler, Rotation};
use crate::types::{CIPHER_ALGORITHM, KeyPurpose, SALT_LEN};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SELF_TEST_PROBE: &[u8] = b"keystone self-test";

/// Where the engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    CleanedUp,
}

impl LifecycleState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::CleanedUp => "cleaned_up",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health and counters as reported by [`KeyEngine::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub initialized: bool,
    pub algorithm: &'static str,
    pub keys_loaded: usize,
    pub key_rotation_enabled: bool,
    pub metrics: MetricsSnapshot,
    pub healthy: bool,
}

#[derive(Debug)]
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) state: RwLock<LifecycleState>,
    pub(crate) master_keys: MasterKeyManager,
    pub(crate) master: RwLock<Option<Arc<MasterKeyRecord>>>,
    pub(crate) keyring: Keyring,
    pub(crate) kdf: KeyDerivation,
    pub(crate) pool: WorkerPool,
    pub(crate) metrics: MetricsRecorder,
    pub(crate) notifier: Notifier,
    pub(crate) scheduler: KeyRotationScheduler,
    pub(crate) lifecycle_lock: tokio::sync::Mutex<()>,
}

/// The key-management and authenticated-encryption engine.
///
/// Owns the master key, one derived key per [`KeyPurpose`], the rotation timer and the
/// operation metrics. Cloning is cheap and every clone drives the same engine, so the
/// composition root creates one and hands clones to whoever needs them.
///
/// Nothing cryptographic works until [`KeyEngine::initialize`] has completed; every such
/// call made earlier, or after [`KeyEngine::cleanup`], fails with
/// [`VaultError::NotInitialized`] and leaves the metrics untouched.
///
/// ### Example
/// ```rust,no_run
/// use keystone_vault::prelude::*;
///
/// # async fn run() -> Result<(), VaultError> {
/// let engine = KeyEngine::builder().key_dir("/var/lib/keystone").build()?;
/// engine.initialize().await?;
///
/// let package = engine.encrypt_data("hello world").await?;
/// let plain = engine.decrypt(&package, None).await?;
/// assert_eq!(plain, b"hello world");
///
/// engine.cleanup().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KeyEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl KeyEngine {
    /// Returns a new [`KeyEngineBuilder`].
    #[must_use]
    pub fn builder() -> KeyEngineBuilder {
        KeyEngineBuilder::new()
    }

    pub(crate) fn from_config(config: EngineConfig) -> Self {
        let store = Arc::new(KeyStore::new(&config.key_dir));
        let inner = EngineInner {
            master_keys: MasterKeyManager::new(store, config.iterations, config.corruption_policy),
            master: RwLock::new(None),
            state: RwLock::new(LifecycleState::Uninitialized),
            keyring: Keyring::new(),
            kdf: KeyDerivation::new(config.iterations),
            pool: WorkerPool::new(config.max_concurrent_jobs),
            metrics: MetricsRecorder::new(),
            notifier: Notifier::new(),
            scheduler: KeyRotationScheduler::new(config.rotation_interval()),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            config,
        };
        Self { inner: Arc::new(inner) }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.read()
    }

    // --- Lifecycle ---

    /// Loads or creates the master key, derives every purpose key, runs a self-test and
    /// arms the rotation timer.
    ///
    /// Calling this on a ready engine does nothing. A failed or cancelled initialization
    /// leaves the engine uninitialized with no key material in memory, so it may be retried.
    ///
    /// # Errors
    /// * [`VaultError::NotInitialized`] if another initialization is in progress.
    /// * [`VaultError::Integrity`] and friends if the persisted master key is corrupt.
    /// * [`VaultError::KeyStoreIo`] if the key directory is unusable.
    pub async fn initialize(&self) -> Result<(), VaultError> {
        {
            let mut state = self.inner.state.write();
            match *state {
                LifecycleState::Ready => {
                    debug!("Engine already initialized");
                    return Ok(());
                },
                LifecycleState::Initializing => {
                    return Err(VaultError::NotInitialized {
                        message: "initialization in progress".into(),
                        context: None,
                    });
                },
                LifecycleState::Uninitialized | LifecycleState::CleanedUp => {
                    *state = LifecycleState::Initializing;
                },
            }
        }

        let mut guard = InitGuard { inner: &self.inner, armed: true };
        // Held until Ready so cleanup cannot interleave with bootstrap.
        let _lifecycle = self.inner.lifecycle_lock.lock().await;
        if *self.inner.state.read() != LifecycleState::Initializing {
            return Err(VaultError::NotInitialized {
                message: "initialization cancelled by cleanup".into(),
                context: None,
            });
        }

        info!(key_dir = %self.inner.config.key_dir.display(), "Initializing key engine");
        let started = Instant::now();

        if let Err(err) = self.bootstrap().await {
            error!(kind = err.kind(), error = %err, "Key engine initialization failed");
            return Err(err);
        }

        guard.armed = false;
        *self.inner.state.write() = LifecycleState::Ready;
        if self.inner.config.rotation_enabled {
            self.start_rotation();
        }

        info!(
            keys = self.inner.keyring.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Key engine ready"
        );
        Ok(())
    }

    async fn bootstrap(&self) -> Result<(), VaultError> {
        let inner = &self.inner;
        let master = inner.master_keys.initialize(&inner.pool).await?;

        let handles: Vec<_> = KeyPurpose::ALL
            .into_iter()
            .map(|purpose| inner.kdf.derive_key_async(&inner.pool, purpose, Arc::clone(&master), None))
            .collect();
        for handle in handles {
            let record = handle.await.context("Deriving purpose keys")?;
            inner.keyring.install(record);
        }
        inner.metrics.record_derivations(KeyPurpose::ALL.len());
        *inner.master.write() = Some(master);

        self.self_test().await
    }

    fn start_rotation(&self) {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.start(move || {
            let weak = Weak::clone(&weak);
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if let Err(err) = inner.rotate().await {
                    warn!(kind = err.kind(), error = %err, "Scheduled key rotation failed; retrying at next tick");
                }
                true
            }
        });
    }

    /// Stops the rotation timer, drops all key material and closes event subscriptions.
    ///
    /// An initialization in flight is waited for and then undone. The engine may be
    /// initialized again afterwards.
    pub async fn cleanup(&self) {
        self.inner.scheduler.stop();
        let _lifecycle = self.inner.lifecycle_lock.lock().await;
        // Initialize may have armed the timer while we waited.
        self.inner.scheduler.stop();

        *self.inner.state.write() = LifecycleState::CleanedUp;
        self.inner.discard_keys();
        self.inner.notifier.close();
        info!("Key engine cleaned up");
    }

    /// Runs the health check and a fresh encrypt/decrypt round-trip.
    ///
    /// # Errors
    /// Returns the first failure found: [`VaultError::NotInitialized`],
    /// [`VaultError::Integrity`] for a bad checksum or missing key, or the self-test's error.
    pub async fn verify(&self) -> Result<(), VaultError> {
        self.inner.ensure_ready()?;

        let master = self.inner.master()?;
        if !master.verify() {
            return Err(VaultError::integrity("master key checksum mismatch"));
        }
        for purpose in KeyPurpose::ALL {
            let record = self.inner.key(purpose)?;
            if !record.verify() {
                return Err(VaultError::Integrity {
                    message: "derived key checksum mismatch".into(),
                    context: Some(purpose.as_str().into()),
                });
            }
        }

        self.self_test().await
    }

    async fn self_test(&self) -> Result<(), VaultError> {
        let record = self.inner.key(KeyPurpose::Data)?;
        self.inner
            .pool
            .run(move || {
                let package = CipherEngine::seal(&record, SELF_TEST_PROBE)?;
                let opened = CipherEngine::open(&record, &package, None)?;
                if opened == SELF_TEST_PROBE {
                    Ok(())
                } else {
                    Err(VaultError::integrity("self-test round-trip returned different bytes"))
                }
            })
            .await
            .context("Self-test")?;
        debug!("Self-test passed");
        Ok(())
    }

    /// Snapshot of health and metrics. Never fails.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let inner = &self.inner;
        let ready = *inner.state.read() == LifecycleState::Ready;
        let master_ok = inner.master.read().as_ref().is_some_and(|m| m.verify());
        let keys_loaded = inner.keyring.len();

        EngineStatus {
            initialized: ready,
            algorithm: CIPHER_ALGORITHM,
            keys_loaded,
            key_rotation_enabled: inner.config.rotation_enabled,
            metrics: inner.metrics.snapshot(),
            healthy: ready
                && master_ok
                && keys_loaded == KeyPurpose::ALL.len()
                && inner.keyring.verify(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    // --- Encryption ---

    /// Seals `data` under the current key for `purpose`.
    ///
    /// # Errors
    /// * [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    /// * [`VaultError::KeyNotFound`] if `purpose` has no loaded key.
    /// * [`VaultError::Encryption`] or [`VaultError::Random`] if sealing fails.
    pub async fn encrypt(
        &self,
        data: impl AsRef<[u8]>,
        purpose: KeyPurpose,
    ) -> Result<EncryptedPackage, VaultError> {
        self.inner.ensure_ready()?;
        let started = Instant::now();
        let plaintext = data.as_ref().to_vec();
        let len = plaintext.len();

        let result = match self.inner.key(purpose) {
            Ok(record) => self.inner.pool.run(move || CipherEngine::seal(&record, &plaintext)).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(package) => {
                self.inner.metrics.record_encryption(len, started.elapsed());
                Ok(package)
            },
            Err(err) => {
                self.inner.metrics.record_failure();
                debug!(purpose = %purpose, kind = err.kind(), "Encryption failed");
                Err(err)
            },
        }
    }

    /// [`KeyEngine::encrypt`] under [`KeyPurpose::Data`].
    ///
    /// # Errors
    /// See [`KeyEngine::encrypt`].
    pub async fn encrypt_data(&self, data: impl AsRef<[u8]>) -> Result<EncryptedPackage, VaultError> {
        self.encrypt(data, KeyPurpose::Data).await
    }

    /// Opens `package` with the current key of its purpose, or of `key_type` when given.
    ///
    /// Only the current key is tried. A package sealed before the last rotation no
    /// longer opens.
    ///
    /// # Errors
    /// * [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    /// * [`VaultError::InvalidPackage`] if the package is malformed.
    /// * [`VaultError::KeyNotFound`] if the purpose is unknown.
    /// * [`VaultError::Integrity`] if the ciphertext checksum does not match.
    /// * [`VaultError::Authentication`] if the tag does not verify.
    pub async fn decrypt(
        &self,
        package: &EncryptedPackage,
        key_type: Option<KeyPurpose>,
    ) -> Result<Vec<u8>, VaultError> {
        self.inner.ensure_ready()?;
        let started = Instant::now();

        let result = match package.validate(key_type).and_then(|parts| self.inner.key(parts.purpose)) {
            Ok(record) => {
                let package = package.clone();
                self.inner
                    .pool
                    .run(move || CipherEngine::open(&record, &package, key_type))
                    .await
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(plaintext) => {
                self.inner.metrics.record_decryption(plaintext.len(), started.elapsed());
                Ok(plaintext)
            },
            Err(err) => {
                self.inner.metrics.record_failure();
                debug!(key_type = %package.key_type, kind = err.kind(), "Decryption failed");
                Err(err)
            },
        }
    }

    /// Seals `text` and returns the package in its JSON wire format.
    ///
    /// # Errors
    /// See [`KeyEngine::encrypt`]; also [`VaultError::Serialization`].
    pub async fn encrypt_string(&self, text: &str, purpose: KeyPurpose) -> Result<String, VaultError> {
        self.encrypt(text.as_bytes(), purpose).await?.to_json()
    }

    /// Parses a JSON package produced by [`KeyEngine::encrypt_string`] and returns the text.
    ///
    /// # Errors
    /// See [`KeyEngine::decrypt`]; also [`VaultError::Utf8`] if the plaintext is not text.
    pub async fn decrypt_string(
        &self,
        package: &str,
        key_type: Option<KeyPurpose>,
    ) -> Result<String, VaultError> {
        self.inner.ensure_ready()?;
        let package = EncryptedPackage::from_json(package)?;
        let bytes = self.decrypt(&package, key_type).await?;
        String::from_utf8(bytes).context("Decrypted data is not UTF-8")
    }

    // --- Hashing ---

    /// Keyless digest of `data`, hex encoded. Works in any lifecycle state.
    pub fn generate_hash(&self, data: impl AsRef<[u8]>, algorithm: HashAlgorithm) -> String {
        let digest = hashing::generate_hash(data.as_ref(), algorithm);
        self.inner.metrics.record_hash();
        digest
    }

    /// HMAC of `data` under the current key for `purpose`, hex encoded.
    ///
    /// # Errors
    /// * [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    /// * [`VaultError::KeyNotFound`] if `purpose` has no loaded key.
    pub async fn generate_hmac(
        &self,
        data: impl AsRef<[u8]>,
        purpose: KeyPurpose,
        algorithm: HashAlgorithm,
    ) -> Result<String, VaultError> {
        self.inner.ensure_ready()?;
        let result = self
            .inner
            .key(purpose)
            .and_then(|record| hashing::generate_hmac(record.key().as_bytes(), data.as_ref(), algorithm));
        self.inner.track_hmac(result)
    }

    /// Checks `signature` against the HMAC of `data` in constant time.
    ///
    /// # Errors
    /// * [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    /// * [`VaultError::KeyNotFound`] if `purpose` has no loaded key.
    pub async fn verify_hmac(
        &self,
        data: impl AsRef<[u8]>,
        signature: &str,
        purpose: KeyPurpose,
        algorithm: HashAlgorithm,
    ) -> Result<bool, VaultError> {
        self.inner.ensure_ready()?;
        let result = self.inner.key(purpose).and_then(|record| {
            hashing::verify_hmac(record.key().as_bytes(), data.as_ref(), signature, algorithm)
        });
        self.inner.track_hmac(result)
    }

    // --- Keys ---

    /// Rotates every purpose now and returns the purposes that switched keys.
    ///
    /// # Errors
    /// * [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    /// * The derivation error that stopped the rotation. Purposes rotated before the
    ///   failure keep their new keys.
    pub async fn rotate_keys(&self) -> Result<Vec<KeyPurpose>, VaultError> {
        self.inner.rotate().await
    }

    /// Superseded keys for `purpose`, oldest first. Audit only.
    ///
    /// # Errors
    /// Returns [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    pub fn key_history(&self, purpose: KeyPurpose) -> Result<Vec<KeyHistoryEntry>, VaultError> {
        self.inner.ensure_ready()?;
        Ok(self.inner.keyring.history(purpose))
    }

    /// Derives a standalone key for `purpose` from the master key on the worker pool.
    ///
    /// The result is not installed; the engine's active keys are unaffected.
    ///
    /// # Errors
    /// Returns [`VaultError::NotInitialized`] before [`KeyEngine::initialize`].
    pub fn derive_key(
        &self,
        purpose: KeyPurpose,
        salt: Option<[u8; SALT_LEN]>,
    ) -> Result<TaskHandle<DerivedKeyRecord>, VaultError> {
        self.inner.ensure_ready()?;
        let master = self.inner.master()?;
        let inner = Arc::clone(&self.inner);

        Ok(self.inner.pool.spawn(move || {
            let record = inner.kdf.derive_key(purpose, &master, salt)?;
            inner.metrics.record_derivations(1);
            Ok(record)
        }))
    }

    // --- Events ---

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<KeyEvent>> {
        self.inner.notifier.subscribe()
    }

    pub fn on_event<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&KeyEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.on_event(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }
}

impl EngineInner {
    fn ensure_ready(&self) -> Result<(), VaultError> {
        match *self.state.read() {
            LifecycleState::Ready => Ok(()),
            state => Err(VaultError::not_initialized(state)),
        }
    }

    fn master(&self) -> Result<Arc<MasterKeyRecord>, VaultError> {
        self.master.read().clone().ok_or_else(|| VaultError::not_initialized("missing its master key"))
    }

    fn key(&self, purpose: KeyPurpose) -> Result<Arc<DerivedKeyRecord>, VaultError> {
        self.keyring.current(purpose).ok_or_else(|| VaultError::key_not_found(purpose.as_str()))
    }

    fn track_hmac<T>(&self, result: Result<T, VaultError>) -> Result<T, VaultError> {
        match &result {
            Ok(_) => self.metrics.record_hmac(),
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn rotate(&self) -> Result<Vec<KeyPurpose>, VaultError> {
        self.ensure_ready()?;
        let _lifecycle = self.lifecycle_lock.lock().await;
        // Cleanup may have won the lock.
        self.ensure_ready()?;
        let master = self.master()?;

        Rotation {
            keyring: &self.keyring,
            master,
            kdf: self.kdf,
            pool: &self.pool,
            metrics: &self.metrics,
            notifier: &self.notifier,
        }
        .run()
        .await
    }

    fn discard_keys(&self) {
        self.keyring.clear();
        self.master.write().take();
    }
}

/// Rolls a failed or cancelled initialization back to `Uninitialized`.
///
/// A state already moved on by cleanup is left alone.
struct InitGuard<'a> {
    inner: &'a EngineInner,
    armed: bool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.write();
        if *state == LifecycleState::Initializing {
            self.inner.discard_keys();
            *state = LifecycleState::Uninitialized;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(dir: &std::path::Path) -> KeyEngine {
        KeyEngine::builder()
            .key_dir(dir)
            .iterations(1_000)
            .allow_weak_iterations(true)
            .rotation_enabled(false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn lifecycle_walks_through_every_state() {
        let tmp = tempdir().unwrap();
        let engine = engine(tmp.path());
        assert_eq!(engine.state(), LifecycleState::Uninitialized);

        engine.initialize().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::Ready);

        engine.cleanup().await;
        assert_eq!(engine.state(), LifecycleState::CleanedUp);
        assert_eq!(engine.status().keys_loaded, 0);

        engine.initialize().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn initialize_twice_is_a_no_op() {
        let tmp = tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.initialize().await.unwrap();
        let before = engine.inner.keyring.current(KeyPurpose::Data).unwrap();

        engine.initialize().await.unwrap();

        let after = engine.inner.keyring.current(KeyPurpose::Data).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(engine.metrics().key_derivations, 4);
    }

    #[tokio::test]
    async fn concurrent_initialize_is_rejected() {
        let tmp = tempdir().unwrap();
        let engine = engine(tmp.path());
        *engine.inner.state.write() = LifecycleState::Initializing;

        let err = engine.initialize().await.unwrap_err();
        assert!(matches!(err, VaultError::NotInitialized { .. }));
        assert!(err.to_string().contains("initialization in progress"));
    }

    #[tokio::test]
    async fn failed_initialize_returns_to_uninitialized() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("master.key"), b"{}").unwrap();
        let engine = engine(tmp.path());

        assert!(engine.initialize().await.is_err());
        assert_eq!(engine.state(), LifecycleState::Uninitialized);
        assert_eq!(engine.status().keys_loaded, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleanup_during_initialize_leaves_no_keys_behind() {
        let tmp = tempdir().unwrap();
        let engine = KeyEngine::builder()
            .key_dir(tmp.path())
            .iterations(50_000)
            .max_concurrent_jobs(1)
            .rotation_interval(std::time::Duration::from_secs(3_600))
            .build()
            .unwrap();

        let init = tokio::spawn({
            let engine = engine.clone();
            async move { engine.initialize().await }
        });
        while engine.state() == LifecycleState::Uninitialized {
            tokio::task::yield_now().await;
        }

        engine.cleanup().await;
        let _ = init.await.unwrap();

        assert_eq!(engine.state(), LifecycleState::CleanedUp);
        assert_eq!(engine.status().keys_loaded, 0);
        assert!(engine.inner.master.read().is_none());
        assert!(!engine.inner.scheduler.is_running());
        assert!(matches!(engine.encrypt_data(b"x").await, Err(VaultError::NotInitialized { .. })));
    }

    #[tokio::test]
    async fn initialize_after_cancelled_start_succeeds() {
        let tmp = tempdir().unwrap();
        let engine = engine(tmp.path());
        *engine.inner.state.write() = LifecycleState::Initializing;
        engine.cleanup().await;

        engine.initialize().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::Ready);
        assert_eq!(engine.status().keys_loaded, 4);
    }

    #[tokio::test]
    async fn not_initialized_message_names_the_state() {
        let tmp = tempdir().unwrap();
        let err = engine(tmp.path()).encrypt_data(b"x").await.unwrap_err();
        assert_eq!(err.to_string(), "Engine not initialized: engine is uninitialized");
    }

    #[tokio::test]
    async fn verify_passes_on_a_ready_engine() {
        let tmp = tempdir().unwrap();
        let engine = engine(tmp.path());
        assert!(matches!(engine.verify().await, Err(VaultError::NotInitialized { .. })));

        engine.initialize().await.unwrap();
        engine.verify().await.unwrap();
        assert!(engine.status().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_timer_runs_only_while_ready() {
        let tmp = tempdir().unwrap();
        let engine = KeyEngine::builder()
            .key_dir(tmp.path())
            .iterations(1_000)
            .allow_weak_iterations(true)
            .rotation_interval(std::time::Duration::from_secs(3_600))
            .build()
            .unwrap();

        engine.initialize().await.unwrap();
        assert!(engine.inner.scheduler.is_running());

        engine.cleanup().await;
        assert!(!engine.inner.scheduler.is_running());
    }
}
