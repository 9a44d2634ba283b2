use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use rscp_connection::ConnectionConfig;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_SLOW_POLL_EVERY: u32 = 30;
const DEFAULT_IDENTIFY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_IDENTIFY_BACKOFF_MAX_MS: u64 = 60_000;

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub connection: ConnectionConfig,
    pub poll_interval_ms: u64,
    /// Every n-th poll also requests the slow tags.
    pub slow_poll_every: u32,
    pub identify_backoff_ms: u64,
    pub identify_backoff_max_ms: u64,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let connection = &self.connection;
        if connection.host.trim().is_empty() {
            anyhow::bail!("rscp.host must be non-empty");
        }
        if connection.port == 0 {
            anyhow::bail!("rscp.port must be between 1 and 65535");
        }
        if connection.username.trim().is_empty() {
            anyhow::bail!("rscp.username must be non-empty");
        }
        if connection.password.is_empty() {
            anyhow::bail!("rscp.password must be non-empty");
        }
        if connection.rscp_key.is_empty() {
            anyhow::bail!("rscp.rscp_key must be non-empty");
        }
        if connection.connect_timeout_ms == 0 {
            anyhow::bail!("rscp.connect_timeout_ms must be >= 1");
        }
        if connection.receive_timeout_ms == 0 {
            anyhow::bail!("rscp.receive_timeout_ms must be >= 1");
        }
        if connection.max_frame_size == 0 {
            anyhow::bail!("rscp.max_frame_size must be >= 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.slow_poll_every == 0 {
            anyhow::bail!("poller.slow_poll_every must be >= 1");
        }
        if self.identify_backoff_ms == 0 {
            anyhow::bail!("identify.backoff_ms must be >= 1");
        }
        if self.identify_backoff_max_ms < self.identify_backoff_ms {
            anyhow::bail!("identify.backoff_max_ms must be >= identify.backoff_ms");
        }

        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            slow_poll_every: DEFAULT_SLOW_POLL_EVERY,
            identify_backoff_ms: DEFAULT_IDENTIFY_BACKOFF_MS,
            identify_backoff_max_ms: DEFAULT_IDENTIFY_BACKOFF_MAX_MS,
        }
    }
}

fn apply_env_overrides(config: &mut CollectorConfig) {
    let connection = &mut config.connection;
    if let Ok(value) = env::var("RSCP_HOST") {
        connection.host = value;
    }
    if let Some(port) = parse_env_u16("RSCP_PORT") {
        connection.port = port;
    }
    if let Ok(value) = env::var("RSCP_USERNAME") {
        connection.username = value;
    }
    if let Ok(value) = env::var("RSCP_PASSWORD") {
        connection.password = value;
    }
    if let Ok(value) = env::var("RSCP_KEY") {
        connection.rscp_key = value;
    }
    if let Some(timeout_ms) = parse_env_u64("RSCP_CONNECT_TIMEOUT_MS") {
        connection.connect_timeout_ms = timeout_ms;
    }
    if let Some(timeout_ms) = parse_env_u64("RSCP_RECEIVE_TIMEOUT_MS") {
        connection.receive_timeout_ms = timeout_ms;
    }

    config.poll_interval_ms =
        parse_env_u64("RSCP_POLL_INTERVAL_MS").unwrap_or(config.poll_interval_ms);
    config.slow_poll_every =
        parse_env_u32("RSCP_SLOW_POLL_EVERY").unwrap_or(config.slow_poll_every);
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    rscp: Option<ConnectionConfig>,
    poller: Option<FilePollerConfig>,
    identify: Option<FileIdentifyConfig>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    slow_poll_every: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FileIdentifyConfig {
    backoff_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("RSCP_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) {
    if let Some(connection) = file.rscp {
        config.connection = connection;
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poll_interval_ms = interval_ms;
        }
        if let Some(every) = poller.slow_poll_every {
            config.slow_poll_every = every;
        }
    }

    if let Some(identify) = file.identify {
        if let Some(backoff) = identify.backoff_ms {
            config.identify_backoff_ms = backoff;
        }
        if let Some(max_backoff) = identify.backoff_max_ms {
            config.identify_backoff_max_ms = max_backoff;
        }
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
