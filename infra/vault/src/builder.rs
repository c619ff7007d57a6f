use crate::config::{CorruptionPolicy, EngineConfig};
use crate::engine::KeyEngine;
use crate::error::VaultError;
use private::Sealed;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct NoKeyDir;
#[derive(Debug)]
pub struct WithKeyDir(PathBuf);

mod private {
    pub(super) trait Sealed {}
}
impl Sealed for NoKeyDir {}
impl Sealed for WithKeyDir {}

/// A builder for [`KeyEngine`].
///
/// A key directory must be chosen, either with [`KeyEngineBuilder::key_dir`] or by
/// starting from a loaded [`EngineConfig`], before the engine can be built.
#[allow(private_bounds)]
#[derive(Debug)]
pub struct KeyEngineBuilder<K: Sealed = NoKeyDir> {
    config: EngineConfig,
    key_dir: K,
}

impl Default for KeyEngineBuilder {
    fn default() -> Self {
        Self { config: EngineConfig::default(), key_dir: NoKeyDir }
    }
}

impl KeyEngineBuilder {
    #[must_use = "Builder must be given a key directory before use"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory that holds `master.key`.
    #[must_use]
    pub fn key_dir(self, dir: impl Into<PathBuf>) -> KeyEngineBuilder<WithKeyDir> {
        KeyEngineBuilder { config: self.config, key_dir: WithKeyDir(dir.into()) }
    }

    /// Starts from a complete configuration, typically one read by
    /// [`crate::config::load_config`].
    #[must_use]
    pub fn config(self, config: EngineConfig) -> KeyEngineBuilder<WithKeyDir> {
        let dir = config.key_dir.clone();
        KeyEngineBuilder { config, key_dir: WithKeyDir(dir) }
    }
}

#[allow(private_bounds)]
impl<K: Sealed> KeyEngineBuilder<K> {
    #[must_use]
    pub const fn rotation_enabled(mut self, enabled: bool) -> Self {
        self.config.rotation_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn rotation_interval(mut self, interval: Duration) -> Self {
        self.config.rotation_interval_secs = interval.as_secs();
        self
    }

    /// PBKDF2 rounds for the master key and every derived key.
    #[must_use]
    pub const fn iterations(mut self, iterations: u32) -> Self {
        self.config.iterations = iterations;
        self
    }

    /// Accepts fewer rounds than [`crate::config::MIN_ITERATIONS`]. Meant for tests.
    #[must_use]
    pub const fn allow_weak_iterations(mut self, allow: bool) -> Self {
        self.config.allow_weak_iterations = allow;
        self
    }

    #[must_use]
    pub const fn max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.config.max_concurrent_jobs = jobs;
        self
    }

    #[must_use]
    pub const fn corruption_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.config.corruption_policy = policy;
        self
    }
}

impl KeyEngineBuilder<WithKeyDir> {
    /// Validates the configuration and creates an uninitialized engine.
    ///
    /// No file is touched until [`KeyEngine::initialize`].
    ///
    /// # Errors
    /// Returns [`VaultError::InvalidConfiguration`] if the configuration is rejected by
    /// [`EngineConfig::validate`].
    pub fn build(self) -> Result<KeyEngine, VaultError> {
        let Self { mut config, key_dir: WithKeyDir(dir) } = self;
        config.key_dir = dir;
        config.validate()?;
        Ok(KeyEngine::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LifecycleState;

    #[test]
    fn build_applies_every_setting() {
        let engine = KeyEngine::builder()
            .key_dir("/tmp/keystone-test")
            .rotation_enabled(false)
            .rotation_interval(Duration::from_secs(60))
            .iterations(20_000)
            .max_concurrent_jobs(3)
            .corruption_policy(CorruptionPolicy::Regenerate)
            .build()
            .unwrap();

        let cfg = engine.config();
        assert_eq!(cfg.key_dir, PathBuf::from("/tmp/keystone-test"));
        assert!(!cfg.rotation_enabled);
        assert_eq!(cfg.rotation_interval_secs, 60);
        assert_eq!(cfg.iterations, 20_000);
        assert_eq!(cfg.max_concurrent_jobs, 3);
        assert_eq!(cfg.corruption_policy, CorruptionPolicy::Regenerate);
        assert_eq!(engine.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn weak_iterations_are_rejected_without_opt_in() {
        let res = KeyEngine::builder().key_dir("keys").iterations(1_000).build();
        assert!(matches!(res, Err(VaultError::InvalidConfiguration { .. })));
    }

    #[test]
    fn loaded_config_carries_its_key_dir() {
        let config = EngineConfig { key_dir: PathBuf::from("/srv/keys"), ..EngineConfig::default() };
        let engine = KeyEngine::builder().config(config).build().unwrap();
        assert_eq!(engine.config().key_dir, PathBuf::from("/srv/keys"));
    }
}
