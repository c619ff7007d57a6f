use crate::error::{VaultError, VaultErrorExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const MASTER_KEY_FILE: &str = "master.key";
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Filesystem home of the master key.
///
/// Owns the access discipline only: an owner-only directory, an owner read/write
/// key file, and atomic replacement of that file. Knows nothing about the bytes it stores.
#[derive(Debug)]
pub struct KeyStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl KeyStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), tmp_counter: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn master_key_path(&self) -> PathBuf {
        self.root.join(MASTER_KEY_FILE)
    }

    /// Creates the key directory if needed and restricts it to its owner.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyStoreIo`] if the directory cannot be created or its
    /// permissions cannot be set.
    pub async fn ensure(&self) -> Result<(), VaultError> {
        fs::create_dir_all(&self.root)
            .await
            .context(format!("Failed to create key directory {}", self.root.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(&self.root).await.context("Reading key directory metadata")?;
            if metadata.permissions().mode() & 0o077 != 0 {
                warn!(
                    path = %self.root.display(),
                    "Key directory is accessible by other users, restricting to owner"
                );
            }
            fs::set_permissions(&self.root, std::fs::Permissions::from_mode(DIR_MODE))
                .await
                .context(format!("Failed to restrict key directory {}", self.root.display()))?;
        }

        debug!(path = %self.root.display(), "Key directory ready");
        Ok(())
    }

    /// Reads the master key file, or `None` if it does not exist yet.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyStoreIo`] on any failure other than a missing file.
    pub async fn read_master_key(&self) -> Result<Option<Vec<u8>>, VaultError> {
        let path = self.master_key_path();
        match fs::read(&path).await {
            Ok(bytes) => {
                #[cfg(unix)]
                self.check_file_mode(&path).await;
                Ok(Some(bytes))
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(VaultError::KeyStoreIo {
                source,
                context: Some(format!("Read failed: {}", path.display()).into()),
            }),
        }
    }

    /// Atomically replaces the master key file with `bytes`, owner read/write only.
    ///
    /// The data goes to a unique temporary file that is restricted, synced and then
    /// renamed over the target, so the key file is never observed half-written.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyStoreIo`] if any step of the write fails.
    pub async fn write_master_key(&self, bytes: &[u8]) -> Result<(), VaultError> {
        let target = self.master_key_path();
        let temp = self.unique_tmp_path(&target);

        let written = self.write_temp(&temp, bytes).await;
        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp, &target).await {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                fs::remove_file(&target)
                    .await
                    .context(format!("Failed to replace existing file: {}", target.display()))?;
                fs::rename(&temp, &target).await.context(format!(
                    "Atomic swap failed: {} -> {}",
                    temp.display(),
                    target.display()
                ))?;
            } else {
                let _ = fs::remove_file(&temp).await;
                return Err(VaultError::KeyStoreIo {
                    source: err,
                    context: Some(
                        format!("Atomic swap failed: {} -> {}", temp.display(), target.display())
                            .into(),
                    ),
                });
            }
        }

        Self::sync_dir(&self.root).await;
        debug!(path = %target.display(), "Master key saved atomically");
        Ok(())
    }

    /// Moves an unusable master key file aside and returns its new path.
    ///
    /// # Errors
    /// Returns [`VaultError::KeyStoreIo`] if the rename fails.
    pub async fn quarantine_master_key(&self) -> Result<PathBuf, VaultError> {
        let source = self.master_key_path();
        let target =
            self.root.join(format!("{MASTER_KEY_FILE}.corrupt-{}", chrono::Utc::now().timestamp()));
        fs::rename(&source, &target).await.context(format!(
            "Failed to preserve corrupt key file {}",
            source.display()
        ))?;
        Ok(target)
    }

    async fn write_temp(&self, temp: &Path, bytes: &[u8]) -> Result<(), VaultError> {
        let mut options = fs::OpenOptions::new();
        options.create_new(true).write(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options
            .open(temp)
            .await
            .context(format!("Temp creation failed: {}", temp.display()))?;
        file.write_all(bytes).await.context("Write failed")?;
        file.sync_all().await.context("Hardware sync failed")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp, std::fs::Permissions::from_mode(FILE_MODE))
                .await
                .context("Restricting key file permissions")?;
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn check_file_mode(&self, path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path).await
            && metadata.permissions().mode() & 0o077 != 0
        {
            warn!(
                path = %path.display(),
                root = %self.root.display(),
                "SECURITY: master key has insecure permissions (should be 600)"
            );
        }
    }

    async fn sync_dir(path: &Path) {
        match fs::File::open(path).await {
            Ok(dir) => {
                if let Err(err) = dir.sync_all().await {
                    warn!(path = %path.display(), error = %err, "Directory sync failed");
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Directory open failed");
            },
        }
    }

    fn unique_tmp_path(&self, target: &Path) -> PathBuf {
        let counter = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = target.file_name().and_then(|s| s.to_str()).unwrap_or(MASTER_KEY_FILE);
        target.with_file_name(format!("{file_name}.tmp.{}.{counter}", std::process::id()))
    }
}
