//! # Engine Configuration
//!
//! [`EngineConfig`] carries every tunable of the engine. It can be built in code,
//! through [`crate::KeyEngineBuilder`], or loaded from a layered source with
//! [`load_config`].

use crate::error::{VaultError, VaultErrorExt};
use crate::types::DEFAULT_ITERATIONS;
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Lowest PBKDF2 round count accepted outside of tests.
pub const MIN_ITERATIONS: u32 = 10_000;

const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// What to do when the persisted master key fails to load or verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionPolicy {
    /// Abort initialization and leave the file untouched for operator recovery.
    #[default]
    Fail,
    /// Move the corrupt file aside and generate a fresh master key.
    ///
    /// Everything sealed under the previous key hierarchy becomes unreadable.
    Regenerate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `master.key`.
    pub key_dir: PathBuf,
    pub rotation_enabled: bool,
    pub rotation_interval_secs: u64,
    /// PBKDF2-HMAC-SHA-256 rounds for master and derived keys.
    pub iterations: u32,
    /// Permits `iterations` below [`MIN_ITERATIONS`]. Test setups only.
    pub allow_weak_iterations: bool,
    /// Upper bound on concurrently running CPU-bound jobs.
    pub max_concurrent_jobs: usize,
    pub corruption_policy: CorruptionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("keys"),
            rotation_enabled: true,
            rotation_interval_secs: DEFAULT_ROTATION_INTERVAL_SECS,
            iterations: DEFAULT_ITERATIONS,
            allow_weak_iterations: false,
            max_concurrent_jobs: std::thread::available_parallelism().map_or(4, usize::from),
            corruption_policy: CorruptionPolicy::Fail,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns [`VaultError::InvalidConfiguration`] for an empty key directory, a zero
    /// rotation interval, a zero worker pool or too few PBKDF2 rounds.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.key_dir.as_os_str().is_empty() {
            return Err(VaultError::invalid_config("key_dir cannot be empty"));
        }
        if self.rotation_enabled && self.rotation_interval_secs == 0 {
            return Err(VaultError::invalid_config("rotation_interval_secs must be greater than zero"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(VaultError::invalid_config("max_concurrent_jobs must be greater than zero"));
        }
        if self.iterations == 0 {
            return Err(VaultError::invalid_config("iterations must be greater than zero"));
        }
        if self.iterations < MIN_ITERATIONS && !self.allow_weak_iterations {
            return Err(VaultError::InvalidConfiguration {
                message: format!("iterations must be at least {MIN_ITERATIONS}").into(),
                context: Some(format!("got {}", self.iterations).into()),
            });
        }
        Ok(())
    }
}

/// Loads a configuration file layered with `KEYSTONE__`-prefixed environment overrides.
///
/// Nested keys use double underscores, so `KEYSTONE__ENGINE__KEY_DIR` maps to
/// `engine.key_dir`. The file format is taken from the extension (`keystone.toml`) or
/// probed when the path has none (`keystone`).
///
/// # Errors
/// Returns [`VaultError::Config`] if the file is missing, a value is malformed, or the
/// result does not deserialize into `T`.
///
/// # Example
/// ```rust,no_run
/// use keystone_vault::config::{EngineConfig, load_config};
///
/// #[derive(Default, serde::Deserialize)]
/// struct DaemonConfig {
///     #[serde(default)]
///     engine: EngineConfig,
/// }
///
/// let cfg: DaemonConfig = load_config("keystone").unwrap_or_default();
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T, VaultError>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();

    let builder = Config::builder().add_source(File::from(path).required(true)).add_source(
        Environment::with_prefix("KEYSTONE").separator("__").convert_case(config::Case::Snake),
    );

    info!(path = %path.display(), "Loading configuration");

    builder
        .build()
        .context("Failed to build config")?
        .try_deserialize::<T>()
        .context("Failed to deserialize config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rotation_interval(), Duration::from_secs(604_800));
        assert_eq!(cfg.iterations, 100_000);
        assert_eq!(cfg.corruption_policy, CorruptionPolicy::Fail);
    }

    #[test]
    fn weak_iterations_require_opt_in() {
        let mut cfg = EngineConfig { iterations: 1_000, ..EngineConfig::default() };
        assert!(matches!(cfg.validate(), Err(VaultError::InvalidConfiguration { .. })));

        cfg.allow_weak_iterations = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_pool_is_rejected() {
        let cfg = EngineConfig { max_concurrent_jobs: 0, ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_toml_with_defaults_for_missing_fields() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "key_dir = \"/var/lib/keystone\"\niterations = 200000\ncorruption_policy = \"regenerate\"\n",
        )?;

        let cfg: EngineConfig = load_config(&path)?;

        assert_eq!(cfg.key_dir, PathBuf::from("/var/lib/keystone"));
        assert_eq!(cfg.iterations, 200_000);
        assert_eq!(cfg.corruption_policy, CorruptionPolicy::Regenerate);
        assert!(cfg.rotation_enabled);
        Ok(())
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        let res: Result<EngineConfig, _> = load_config(dir.path().join("absent.toml"));
        assert!(matches!(res, Err(VaultError::Config { .. })));
    }
}
