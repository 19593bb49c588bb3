//! Device identity and capabilities.
//!
//! The device id is generated once and persisted by the server; the display
//! name is derived from it so that several scanners on one network can be
//! told apart.

use serde::{Deserialize, Serialize};

/// Prefix of every device display name.
pub const NAME_PREFIX: &str = "UnLook-";

/// Number of trailing id characters used in the display name.
const NAME_SUFFIX_LEN: usize = 6;

/// Feature flags advertised in discovery announcements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// More than one camera is available.
    pub dual_camera: bool,
    /// Cameras deliver colour images.
    pub color_mode: bool,
    /// A time-of-flight sensor is fitted.
    pub tof: bool,
    /// A structured-light projector is fitted.
    pub dlp: bool,
}

impl Capabilities {
    /// Capabilities for a device with `camera_count` working cameras.
    pub fn for_cameras(camera_count: usize, projector: bool) -> Self {
        Self {
            dual_camera: camera_count > 1,
            color_mode: true,
            tof: false,
            dlp: projector,
        }
    }
}

/// Static facts about the running device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable unique id, persisted across restarts.
    pub device_id: String,
    /// Human-readable name, derived from the id.
    pub name: String,
    /// Server software version.
    pub version: String,
    /// Number of cameras that initialised successfully.
    pub cameras: usize,
    /// Advertised feature flags.
    pub capabilities: Capabilities,
}

impl DeviceIdentity {
    /// Builds an identity, deriving the name and capabilities.
    pub fn new(device_id: impl Into<String>, cameras: usize, projector: bool) -> Self {
        let device_id = device_id.into();
        Self {
            name: display_name(&device_id),
            device_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cameras,
            capabilities: Capabilities::for_cameras(cameras, projector),
        }
    }

    /// Overrides the reported software version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Derives the display name: the prefix followed by the last six characters
/// of the id.
pub fn display_name(device_id: &str) -> String {
    let chars: Vec<char> = device_id.chars().collect();
    let start = chars.len().saturating_sub(NAME_SUFFIX_LEN);
    let suffix: String = chars[start..].iter().collect();
    format!("{NAME_PREFIX}{suffix}")
}
