//! Configuration management for the P2P harness
//!
//! Handles loading (JSON or TOML), environment overrides and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::network::protocol::{
    NetworkKind, BLOSSOM_PROTO_VERSION, MAX_PROTOCOL_MESSAGE_LENGTH, MESSAGE_HEADER_SIZE,
    MIN_CHECKSUM_VERSION, MY_SUBVERSION,
};
use crate::utils::{env_int, env_opt};

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "pastel_mininode=debug"); `RUST_LOG` wins
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (needs the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Network whose magic bytes frame every message
    #[serde(default)]
    pub network: NetworkKind,

    /// Version announced in our `version` message
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,

    /// Service bits announced in our `version` message
    #[serde(default = "default_services")]
    pub services: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_start_height")]
    pub start_height: i32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on one readiness pass of the network thread
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue a ping when nothing was sent for this long
    #[serde(default = "default_idle_ping_secs")]
    pub idle_ping_secs: u64,

    /// Largest accepted message body
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_protocol_version() -> i32 {
    BLOSSOM_PROTO_VERSION
}

fn default_services() -> u64 {
    1
}

fn default_user_agent() -> String {
    MY_SUBVERSION.to_string()
}

fn default_start_height() -> i32 {
    -1
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_idle_ping_secs() -> u64 {
    30 * 60
}

fn default_max_message_length() -> usize {
    MAX_PROTOCOL_MESSAGE_LENGTH
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            network: NetworkKind::default(),
            protocol_version: default_protocol_version(),
            services: default_services(),
            user_agent: default_user_agent(),
            start_height: default_start_height(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_ping_secs: default_idle_ping_secs(),
            max_message_length: default_max_message_length(),
            logging: None,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load by extension: `.toml` is TOML, anything else JSON
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_file(path),
            _ => Self::from_json_file(path),
        }
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `MININODE_NETWORK`, `MININODE_PROTOCOL_VERSION` and
    /// `MININODE_POLL_INTERVAL_MS` when set
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Some(network) = env_opt("MININODE_NETWORK") {
            self.network = network
                .parse()
                .map_err(|e: String| anyhow::anyhow!("MININODE_NETWORK: {}", e))?;
            debug!("Network overridden from environment: {}", self.network);
        }
        if let Some(version) = env_opt("MININODE_PROTOCOL_VERSION") {
            self.protocol_version = env_int("MININODE_PROTOCOL_VERSION").ok_or_else(|| {
                anyhow::anyhow!("MININODE_PROTOCOL_VERSION is not an integer: {}", version)
            })?;
        }
        if let Some(interval) = env_opt("MININODE_POLL_INTERVAL_MS") {
            self.poll_interval_ms = env_int("MININODE_POLL_INTERVAL_MS").ok_or_else(|| {
                anyhow::anyhow!("MININODE_POLL_INTERVAL_MS is not an integer: {}", interval)
            })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("poll_interval_ms must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("connect_timeout_ms must be greater than 0"));
        }
        if self.protocol_version < MIN_CHECKSUM_VERSION {
            return Err(anyhow::anyhow!(
                "protocol_version {} is below the minimum of {}",
                self.protocol_version,
                MIN_CHECKSUM_VERSION
            ));
        }
        if self.max_message_length < MESSAGE_HEADER_SIZE {
            return Err(anyhow::anyhow!(
                "max_message_length must be at least {} bytes",
                MESSAGE_HEADER_SIZE
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_ping(&self) -> Duration {
        Duration::from_secs(self.idle_ping_secs)
    }
}
