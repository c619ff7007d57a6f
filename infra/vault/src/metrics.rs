use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct RunningAverage {
    samples: u64,
    mean_ms: f64,
}

impl RunningAverage {
    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, elapsed: Duration) {
        self.samples += 1;
        let sample = elapsed.as_secs_f64() * 1_000.0;
        self.mean_ms += (sample - self.mean_ms) / self.samples as f64;
    }
}

/// Operation counters and running-average latencies.
///
/// Counters only grow. Each is bumped by the component that performs the operation.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    encryption_operations: AtomicU64,
    decryption_operations: AtomicU64,
    total_bytes_encrypted: AtomicU64,
    total_bytes_decrypted: AtomicU64,
    key_derivations: AtomicU64,
    key_rotations: AtomicU64,
    hmac_operations: AtomicU64,
    hash_operations: AtomicU64,
    failed_operations: AtomicU64,
    encryption_latency: Mutex<RunningAverage>,
    decryption_latency: Mutex<RunningAverage>,
}

/// Point-in-time copy of [`MetricsRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub encryption_operations: u64,
    pub decryption_operations: u64,
    pub total_bytes_encrypted: u64,
    pub total_bytes_decrypted: u64,
    pub key_derivations: u64,
    pub key_rotations: u64,
    pub hmac_operations: u64,
    pub hash_operations: u64,
    pub failed_operations: u64,
    pub average_encryption_time_ms: f64,
    pub average_decryption_time_ms: f64,
}

impl MetricsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_encryption(&self, bytes: usize, elapsed: Duration) {
        self.encryption_operations.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_encrypted.fetch_add(bytes as u64, Ordering::Relaxed);
        self.encryption_latency.lock().push(elapsed);
    }

    pub fn record_decryption(&self, bytes: usize, elapsed: Duration) {
        self.decryption_operations.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_decrypted.fetch_add(bytes as u64, Ordering::Relaxed);
        self.decryption_latency.lock().push(elapsed);
    }

    pub fn record_derivations(&self, count: usize) {
        self.key_derivations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.key_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hmac(&self) {
        self.hmac_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hash(&self) {
        self.hash_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_operations.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            encryption_operations: self.encryption_operations.load(Ordering::Relaxed),
            decryption_operations: self.decryption_operations.load(Ordering::Relaxed),
            total_bytes_encrypted: self.total_bytes_encrypted.load(Ordering::Relaxed),
            total_bytes_decrypted: self.total_bytes_decrypted.load(Ordering::Relaxed),
            key_derivations: self.key_derivations.load(Ordering::Relaxed),
            key_rotations: self.key_rotations.load(Ordering::Relaxed),
            hmac_operations: self.hmac_operations.load(Ordering::Relaxed),
            hash_operations: self.hash_operations.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
            average_encryption_time_ms: self.encryption_latency.lock().mean_ms,
            average_decryption_time_ms: self.decryption_latency.lock().mean_ms,
        }
    }
}
