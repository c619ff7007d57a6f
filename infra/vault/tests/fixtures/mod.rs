use keystone_vault::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// PBKDF2 rounds used by tests; production keeps the 100 000 default.
pub const TEST_ITERATIONS: u32 = 1_000;

/// Builds an engine over `dir` with fast key stretching and no rotation timer.
/// # Panics
/// * If the builder rejects the test configuration.
#[must_use]
pub fn engine_at(dir: &Path) -> KeyEngine {
    KeyEngine::builder()
        .key_dir(dir)
        .iterations(TEST_ITERATIONS)
        .allow_weak_iterations(true)
        .rotation_enabled(false)
        .max_concurrent_jobs(2)
        .build()
        .expect("Engine setup failed")
}

/// Creates and initializes an engine in a fresh temporary key directory.
///
/// The directory lives as long as the returned [`TempDir`].
/// # Panics
/// * If the engine fails to initialize.
pub async fn ready_engine() -> (KeyEngine, TempDir) {
    let dir = tempfile::tempdir().expect("Temp dir creation failed");
    let engine = engine_at(dir.path());
    engine.initialize().await.expect("Engine initialization failed");
    (engine, dir)
}
