//! Agent configuration
//!
//! TOML file with one section per subsystem; every field has a compiled
//! default carrying the constants the device shipped with, so a missing or
//! partial file still yields a runnable agent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::payload::DEFAULT_CAPACITY;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "CSTICK_AGENT_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub store: StoreConfig,
    pub link: LinkConfig,
    pub broker: BrokerConfig,
    pub pacing: PacingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Record store location, relative to the working directory.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Network the supplicant is expected to join.
    pub network: String,
    /// Restrict association probing to one interface name.
    pub interface: Option<String>,
    /// Optional command run on association requests; `{network}` is
    /// substituted before it is handed to the shell.
    pub associate_command: Option<String>,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
    pub retry_backoff_secs: u64,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub tick_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cStick.csv"),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            network: "RNV_INTELBRAS".to_string(),
            interface: None,
            associate_command: None,
            retry_interval_ms: 500,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            client_id: "cstick-agent".to_string(),
            topic: "cStick/sensor_data".to_string(),
            keep_alive_secs: 30,
            retry_backoff_secs: 5,
            max_payload_bytes: DEFAULT_CAPACITY,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
        }
    }
}

impl AgentConfig {
    /// Config file location: env override, else the working directory.
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("cstick-agent.toml"))
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()).await
    }

    /// Load from `path`; a missing file yields the defaults.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.store.path, PathBuf::from("cStick.csv"));
        assert_eq!(config.link.network, "RNV_INTELBRAS");
        assert_eq!(config.link.retry_interval_ms, 500);
        assert_eq!(config.broker.host, "test.mosquitto.org");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topic, "cStick/sensor_data");
        assert_eq!(config.broker.retry_backoff_secs, 5);
        assert_eq!(config.broker.max_payload_bytes, 512);
        assert_eq!(config.pacing.tick_interval_ms, 2000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AgentConfig = toml::from_str(
            "[broker]\n\
             host = \"10.0.0.5\"\n",
        )
        .unwrap();
        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.link.retry_interval_ms, 500);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.broker.port, 1883);
    }

    #[tokio::test]
    async fn test_file_overrides_and_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[store]\n\
             path = \"demo.csv\"\n\
             \n\
             [link]\n\
             network = \"lab\"\n\
             interface = \"wlan0\"\n\
             \n\
             [pacing]\n\
             tick_interval_ms = 100\n"
        )
        .unwrap();
        file.flush().unwrap();

        let config = AgentConfig::load_from(file.path()).await.unwrap();
        assert_eq!(config.store.path, PathBuf::from("demo.csv"));
        assert_eq!(config.link.network, "lab");
        assert_eq!(config.link.interface.as_deref(), Some("wlan0"));
        assert_eq!(config.pacing.tick_interval_ms, 100);

        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed: AgentConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.link.network, "lab");
        assert_eq!(reparsed.broker.port, 1883);
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not valid toml [").unwrap();
        file.flush().unwrap();

        assert!(AgentConfig::load_from(file.path()).await.is_err());
    }
}
