//! Client configuration.
//!
//! Settings live in a single optional `config.toml` file at
//! `~/.config/unlook/config.toml` by default. Command-line flags and
//! `UNLOOK_*` environment variables take precedence over the file.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use unlook_server::{
    DEFAULT_BEACON_PORT, DEFAULT_COMMAND_PORT, DEFAULT_DISCOVERY_PORT, DEFAULT_STREAM_PORT,
};

/// Configuration for the unlook client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    /// How to reach the scanner.
    pub device: DeviceSettings,

    /// Settings for `unlook server`.
    pub server: DaemonSettings,
}

/// Connection settings for the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Scanner host. When unset the first device found by discovery is used.
    pub host: Option<String>,

    /// Control channel port.
    pub command_port: u16,

    /// Frame stream port.
    pub stream_port: u16,

    /// Discovery port.
    pub discovery_port: u16,

    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: None,
            command_port: DEFAULT_COMMAND_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            timeout: 5,
        }
    }
}

impl DeviceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

/// Settings for running the daemon locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Directory for the device id and configuration document.
    pub state_dir: Option<PathBuf>,

    /// Address to bind.
    pub bind: Option<IpAddr>,

    /// Auxiliary port that also receives beacons.
    pub beacon_port: u16,

    /// Broadcast announce beacons while no client is connected.
    pub beacon: bool,

    /// A structured-light projector is attached.
    pub projector: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            state_dir: None,
            bind: None,
            beacon_port: DEFAULT_BEACON_PORT,
            beacon: true,
            projector: false,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("unlook")
    }
}
