use keystone_logger::{LogRotation, Logger, LoggingConfig};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn json_file_logging_from_config() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempdir()?;
    let log_dir = tmp_dir.path().join("logs");
    let config = LoggingConfig {
        name: "keystone-from-config".to_owned(),
        console: false,
        level: "info".to_owned(),
        path: Some(log_dir.clone()),
        rotation: LogRotation::Never,
        json: true,
        ..LoggingConfig::default()
    };

    let logger = Logger::from_config(&config)?;
    assert!(logger.guard().is_some());

    tracing::info!(purpose = "data", "structured line");
    std::thread::sleep(Duration::from_millis(30));
    drop(logger);

    let log_file = fs::read_dir(&log_dir)?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .expect("log file should be created");

    let contents = fs::read_to_string(log_file)?;
    let line = contents.lines().next().expect("log file should not be empty");
    let value: serde_json::Value = serde_json::from_str(line)?;
    assert_eq!(value["fields"]["message"], "structured line");
    Ok(())
}
