use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    /// Upper bound on the storage reported to the control node.
    pub max_storage_mb: u64,
    pub control_url: String,
    pub node_serial: u64,
    pub send_concurrency: usize,
    pub integrity_interval: Duration,
    pub heartbeat_interval: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl NodeConfig {
    /// Read `STRATA_*` variables, falling back to defaults where that is safe.
    /// The control node URL and this node's certificate serial are required.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("STRATA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("STRATA_PORT")
            .unwrap_or_else(|_| "8085".into())
            .parse()
            .context("STRATA_PORT must be a port number")?;
        let storage_dir: PathBuf = std::env::var("STRATA_STORAGE_DIR")
            .unwrap_or_else(|_| "./strata-chunks".into())
            .into();
        let control_url = std::env::var("STRATA_CONTROL_URL").context("STRATA_CONTROL_URL is not set")?;
        let node_serial: u64 = std::env::var("STRATA_NODE_SERIAL")
            .context("STRATA_NODE_SERIAL is not set")?
            .parse()
            .context("STRATA_NODE_SERIAL must be an integer")?;

        Ok(Self {
            host,
            port,
            storage_dir,
            max_storage_mb: env_or("STRATA_MAX_STORAGE_MB", 10_000),
            control_url: control_url.trim_end_matches('/').to_string(),
            node_serial,
            send_concurrency: env_or("STRATA_SEND_CONCURRENCY", 3),
            integrity_interval: Duration::from_secs(env_or("STRATA_INTEGRITY_HOURS", 24u64) * 3600),
            heartbeat_interval: Duration::from_secs(env_or("STRATA_HEARTBEAT_SECS", 300)),
        })
    }
}
