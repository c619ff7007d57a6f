use anyhow::Context;
use keystone_logger::Logger;
use keystoned::{Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "keystone".to_owned());
    let cfg = DaemonConfig::load(&path).context("Critical: Configuration is malformed")?;

    let _log = Logger::from_config(&cfg.logging)?;

    Daemon::builder().config(cfg).build()?.run().await
}
