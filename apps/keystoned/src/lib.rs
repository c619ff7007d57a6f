//! # Keystone Daemon
//!
//! Hosts one [`KeyEngine`] for the lifetime of the process: initializes it, logs its
//! rotation events and cleans it up on shutdown.
//!
//! ## Example
//! ```no_run
//! use keystoned::{Daemon, DaemonConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = DaemonConfig::load("keystone")?;
//!     Daemon::builder().config(cfg).build()?.run().await
//! }
//! ```

use anyhow::{Context, Result};
use keystone_logger::LoggingConfig;
use keystone_vault::config::{EngineConfig, load_config};
use keystone_vault::{KeyEngine, KeyEvent, KeyEventReceiverExt};
use serde::Deserialize;
use std::path::Path;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Contents of `keystone.toml`.
///
/// ```toml
/// [engine]
/// key_dir = "/var/lib/keystone"
/// rotation_interval_secs = 604800
///
/// [logging]
/// name = "keystoned"
/// level = "info"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Reads the file at `path` layered with `KEYSTONE__` environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        load_config(path).with_context(|| format!("Failed to load {}", path.display()))
    }
}

/// A fluent builder for configuring the [`Daemon`].
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct DaemonBuilder {
    cfg: DaemonConfig,
}

impl DaemonBuilder {
    pub fn config(mut self, cfg: DaemonConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Validates the engine configuration and creates the engine without touching disk.
    ///
    /// # Errors
    /// Returns an error if the engine configuration is invalid.
    pub fn build(self) -> Result<Daemon> {
        let engine = KeyEngine::builder()
            .config(self.cfg.engine)
            .build()
            .context("Invalid engine configuration")?;
        Ok(Daemon { engine })
    }
}

/// A configured daemon ready to run.
#[must_use = "call .run().await to start the daemon"]
#[derive(Debug)]
pub struct Daemon {
    engine: KeyEngine,
}

impl Daemon {
    pub fn builder() -> DaemonBuilder {
        DaemonBuilder::default()
    }

    #[must_use]
    pub const fn engine(&self) -> &KeyEngine {
        &self.engine
    }

    /// Initializes the engine, runs until a shutdown signal arrives, then cleans up.
    ///
    /// # Errors
    /// Returns an error if the engine fails to initialize or the signal handlers cannot
    /// be installed.
    pub async fn run(self) -> Result<()> {
        self.start().await?;

        let res = shutdown_signal().await;
        info!("Shutdown signal received, cleaning up key engine...");
        self.stop().await;

        res?;
        info!("Keystone daemon shutdown complete");
        Ok(())
    }

    /// Initializes the engine and starts logging its events.
    ///
    /// # Errors
    /// Returns an error if the engine fails to initialize.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let cfg = self.engine.config();
        info!(
            key_dir = %cfg.key_dir.display(),
            rotation = cfg.rotation_enabled,
            interval_secs = cfg.rotation_interval_secs,
            "Starting keystone daemon"
        );

        self.engine.initialize().await.context("Key engine failed to initialize")?;
        let status = serde_json::to_string(&self.engine.status())?;
        info!(status = %status, "Key engine ready");

        Ok(spawn_event_logger(self.engine.subscribe()))
    }

    /// Stops rotation and discards key material.
    pub async fn stop(&self) {
        self.engine.cleanup().await;
    }
}

fn spawn_event_logger(
    mut events: tokio::sync::broadcast::Receiver<std::sync::Arc<KeyEvent>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next_event().await {
            match &*event {
                KeyEvent::Rotated { timestamp, purposes } => {
                    info!(at = %timestamp, purposes = ?purposes, "Keys rotated");
                },
                KeyEvent::RotationFailed { timestamp, error, rotated } => {
                    error!(at = %timestamp, error = %error, rotated = ?rotated, "Key rotation failed");
                },
            }
        }
        warn!("Key event stream closed");
    })
}

/// Listens for shutdown signals (Ctrl+C, SIGTERM).
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => {
            res.context("Ctrl+C signal received")?;
        },
        res = terminate => {
            res.context("SIGTERM signal received")?;
        },
    }

    Ok(())
}
