//! Persisted device state: the device id and the configuration document.
//!
//! Both live as plain files in the state directory:
//!
//! ```text
//! <state_dir>/device_id     generated once, reused across restarts
//! <state_dir>/config.json   written on first start and on every SetConfig
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use unlook_core::DeviceConfig;

use crate::error::{ServerError, ServerResult};

const DEVICE_ID_FILE: &str = "device_id";
const CONFIG_FILE: &str = "config.json";

/// File-backed store for the device id and configuration.
#[derive(Debug, Clone)]
pub struct DeviceStore {
    dir: PathBuf,
}

impl DeviceStore {
    /// Opens the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> ServerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| ServerError::persist(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn device_id_path(&self) -> PathBuf {
        self.dir.join(DEVICE_ID_FILE)
    }

    /// Returns the persisted device id, generating and saving one on first
    /// use.
    ///
    /// If the new id cannot be saved it is still returned; the device then
    /// gets a fresh id on the next start.
    pub fn device_id(&self) -> String {
        let path = self.device_id_path();
        match fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => return content.trim().to_string(),
            Ok(_) => warn!(path = %path.display(), "Device id file is empty, generating a new id"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read device id"),
        }

        let id = Uuid::new_v4().to_string();
        match write_atomic(&path, id.as_bytes()) {
            Ok(()) => info!(device_id = %id, "Generated device id"),
            Err(e) => warn!(error = %e, "Failed to save device id"),
        }
        id
    }

    /// Loads the configuration document.
    ///
    /// Falls back to the built-in defaults when the file is missing or
    /// unreadable. A missing file is created with the defaults.
    pub fn load_config(&self) -> DeviceConfig {
        let path = self.config_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let config = DeviceConfig::default();
                match self.save_config(&config) {
                    Ok(()) => info!(path = %path.display(), "Wrote default configuration"),
                    Err(e) => warn!(error = %e, "Failed to write default configuration"),
                }
                return config;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read configuration, using defaults");
                return DeviceConfig::default();
            }
        };

        match serde_json::from_str::<DeviceConfig>(&content) {
            Ok(config) => match config.validate() {
                Ok(()) => {
                    debug!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid configuration, using defaults");
                    DeviceConfig::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unparseable configuration, using defaults");
                DeviceConfig::default()
            }
        }
    }

    /// Writes the configuration document.
    pub fn save_config(&self, config: &DeviceConfig) -> ServerResult<()> {
        let path = self.config_path();
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| ServerError::persist(&path, io::Error::other(e)))?;
        write_atomic(&path, &json)
    }
}

/// Writes through a temporary file and renames it over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> ServerResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(|e| ServerError::persist(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| ServerError::persist(path, e))?;
    Ok(())
}
