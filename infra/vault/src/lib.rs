//! A key-management and authenticated-encryption engine.
//!
//! The engine keeps one persisted master key and derives one subkey per [`KeyPurpose`]
//! from it. Callers seal data into self-describing [`EncryptedPackage`]s under a purpose's
//! current key, compute HMACs and hashes, and observe scheduled key rotation through
//! [`KeyEvent`]s.
//!
//! ## Key Hierarchy
//!
//! ```text
//! master.key (64 random bytes, PBKDF2-HMAC-SHA-256, 32-byte salt)
//!     └── derive(salt ‖ purpose) ──► application | data | session | storage
//! ```
//!
//! The master key lives in `<key_dir>/master.key` with mode `0600` inside a `0700`
//! directory. Derived keys live only in memory and are re-derived, never persisted.
//! Rotation re-derives every purpose from the unchanged master key with a fresh salt and
//! keeps the last five superseded keys for audit. Decryption only ever uses the current
//! key, so packages must be re-sealed after a rotation.
//!
//! ## Package Format
//!
//! ```text
//! {"algorithm":"aes-256-gcm","keyType":"data","iv":<b64 16B>,"tag":<b64 16B>,
//!  "data":<b64>,"timestamp":<ISO-8601>,"checksum":<hex sha-256 of data>}
//! ```
//!
//! The purpose string is bound as associated data, so a package cannot be replayed
//! under another purpose. A checksum mismatch reports [`VaultError::Integrity`]; a tag
//! mismatch reports [`VaultError::Authentication`].
//!
//! ## Examples
//!
//! ```rust,no_run
//! use keystone_vault::prelude::*;
//!
//! # async fn run() -> Result<(), VaultError> {
//! let engine = KeyEngine::builder().key_dir("./keys").build()?;
//! engine.initialize().await?;
//!
//! let sealed = engine.encrypt_string("secret", KeyPurpose::Session).await?;
//! let text = engine.decrypt_string(&sealed, None).await?;
//! assert_eq!(text, "secret");
//!
//! let sig = engine.generate_hmac("payload", KeyPurpose::Application, HashAlgorithm::Sha256).await?;
//! assert!(engine.verify_hmac("payload", &sig, KeyPurpose::Application, HashAlgorithm::Sha256).await?);
//!
//! engine.cleanup().await;
//! # Ok(())
//! # }
//! ```

mod builder;
mod cipher;
pub mod config;
mod derivation;
mod engine;
mod error;
mod hashing;
mod keyring;
mod keystore;
mod master;
mod metrics;
mod notify;
mod package;
mod pool;
mod records;
mod rotation;
mod types;

pub use builder::{KeyEngineBuilder, NoKeyDir, WithKeyDir};
pub use cipher::CipherEngine;
pub use derivation::KeyDerivation;
pub use engine::{EngineStatus, KeyEngine, LifecycleState};
pub use error::{VaultError, VaultErrorExt};
pub use hashing::{HashAlgorithm, generate_hash, generate_hmac, verify_hmac};
pub use keyring::Keyring;
pub use keystore::KeyStore;
pub use master::MasterKeyManager;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use notify::{KeyEvent, KeyEventReceiverExt, Notifier, SubscriptionId};
pub use package::EncryptedPackage;
pub use pool::{TaskHandle, WorkerPool};
pub use records::{DerivedKeyRecord, KeyHistoryEntry, MasterKeyRecord, checksum};
pub use rotation::KeyRotationScheduler;
pub use types::{
    CIPHER_ALGORITHM, DEFAULT_ITERATIONS, HISTORY_CAPACITY, IV_LEN, KDF_ALGORITHM, KEY_LEN,
    KeyPurpose, SALT_LEN, TAG_LEN,
};

pub mod prelude {
    pub use crate::config::{CorruptionPolicy, EngineConfig};
    pub use crate::engine::{EngineStatus, KeyEngine, LifecycleState};
    pub use crate::error::{VaultError, VaultErrorExt};
    pub use crate::hashing::HashAlgorithm;
    pub use crate::notify::{KeyEvent, KeyEventReceiverExt};
    pub use crate::package::EncryptedPackage;
    pub use crate::types::KeyPurpose;
}
