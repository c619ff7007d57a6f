use crate::derivation::KeyDerivation;
use crate::error::VaultError;
use crate::keyring::Keyring;
use crate::metrics::MetricsRecorder;
use crate::notify::{KeyEvent, Notifier};
use crate::pool::WorkerPool;
use crate::records::{DerivedKeyRecord, MasterKeyRecord};
use crate::types::KeyPurpose;
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Periodic timer that drives key rotation.
///
/// The first tick fires one full interval after [`KeyRotationScheduler::start`].
#[derive(Debug)]
pub struct KeyRotationScheduler {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    in_pass: Arc<AtomicBool>,
}

impl KeyRotationScheduler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, task: Mutex::new(None), in_pass: Arc::new(AtomicBool::new(false)) }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Arms the timer, calling `tick` on every period. A second call while running is a no-op.
    ///
    /// The loop ends when `tick` returns `false` or the scheduler is stopped.
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(&self, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Key rotation timer already running");
            return;
        }

        let period = self.interval;
        let in_pass = Arc::clone(&self.in_pass);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                in_pass.store(true, Ordering::Release);
                let again = tick().await;
                in_pass.store(false, Ordering::Release);
                if !again {
                    break;
                }
            }
        }));
        info!(interval_secs = period.as_secs(), "Key rotation timer started");
    }

    /// Aborts the timer task. A pass in flight is dropped between purposes.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            if self.in_pass.swap(false, Ordering::AcqRel) && !task.is_finished() {
                debug!("Aborting key rotation pass in flight");
            }
            task.abort();
            info!("Key rotation timer stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Whether a tick is currently executing.
    #[must_use]
    pub fn is_rotating(&self) -> bool {
        self.in_pass.load(Ordering::Acquire)
    }
}

impl Drop for KeyRotationScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Everything one rotation pass touches.
#[derive(Debug)]
pub(crate) struct Rotation<'a> {
    pub(crate) keyring: &'a Keyring,
    pub(crate) master: Arc<MasterKeyRecord>,
    pub(crate) kdf: KeyDerivation,
    pub(crate) pool: &'a WorkerPool,
    pub(crate) metrics: &'a MetricsRecorder,
    pub(crate) notifier: &'a Notifier,
}

impl Rotation<'_> {
    /// Re-derives every loaded purpose from the master key, one purpose at a time.
    ///
    /// Not transactional: if a purpose fails, purposes already rotated keep their new
    /// keys and the rest keep their old ones. The outcome is published either way.
    pub(crate) async fn run(self) -> Result<Vec<KeyPurpose>, VaultError> {
        let (kdf, pool, master) = (self.kdf, self.pool, Arc::clone(&self.master));
        self.run_with(move |purpose| kdf.derive_key_async(pool, purpose, Arc::clone(&master), None))
            .await
    }

    /// [`Rotation::run`] with the per-purpose derivation supplied by the caller.
    async fn run_with<F, Fut>(self, mut derive: F) -> Result<Vec<KeyPurpose>, VaultError>
    where
        F: FnMut(KeyPurpose) -> Fut,
        Fut: Future<Output = Result<DerivedKeyRecord, VaultError>>,
    {
        let mut rotated = Vec::with_capacity(KeyPurpose::ALL.len());

        for purpose in self.keyring.purposes() {
            let derived = derive(purpose).await;

            match derived {
                Ok(record) => {
                    self.keyring.rotate(record);
                    self.metrics.record_derivations(1);
                    rotated.push(purpose);
                },
                Err(err) => {
                    self.metrics.record_failure();
                    error!(
                        purpose = %purpose,
                        kind = err.kind(),
                        error = %err,
                        rotated = ?rotated,
                        "Key rotation failed part-way"
                    );
                    self.notifier.publish(KeyEvent::RotationFailed {
                        timestamp: Utc::now(),
                        error: err.to_string(),
                        rotated: rotated.clone(),
                    });
                    return Err(err);
                },
            }
        }

        self.metrics.record_rotation();
        info!(purposes = ?rotated, "Keys rotated");
        self.notifier.publish(KeyEvent::Rotated { timestamp: Utc::now(), purposes: rotated.clone() });
        Ok(rotated)
    }
}
