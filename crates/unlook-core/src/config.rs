//! Device configuration document.
//!
//! The configuration is hierarchical: one section per camera and one
//! stream-wide section. Updates arrive as partial JSON trees and are applied
//! with [`merge_json`], which replaces only the leaves present in the update.
//! Keys the server does not interpret are kept in each section's `extra` map
//! and round-trip unchanged.
//!
//! ```text
//! {
//!   "camera": {
//!     "left":  { "enabled": true, "resolution": [1280, 720], "framerate": 30, "format": "RGB888" },
//!     "right": { "enabled": true, "resolution": [1280, 720], "framerate": 30, "format": "RGB888" }
//!   },
//!   "stream": { "format": "h264", "quality": 23, "bitrate": 2000000 }
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::resolution::Resolution;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while updating or validating a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The merged document does not match the configuration schema.
    #[error("invalid configuration: {0}")]
    Schema(#[from] serde_json::Error),

    /// The update is not a JSON object.
    #[error("configuration update must be an object, got {0}")]
    NotAnObject(&'static str),

    /// A field holds a value outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    OutOfRange { field: String, reason: String },
}

impl ConfigError {
    fn out_of_range(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Physical position of a camera on the scanner head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSide {
    Left,
    Right,
}

impl CameraSide {
    /// Both sides, in index order.
    pub const ALL: [CameraSide; 2] = [CameraSide::Left, CameraSide::Right];

    /// Wire index of the camera (0 = left, 1 = right).
    pub fn index(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    /// Looks up a side from its wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Left),
            1 => Some(Self::Right),
            _ => None,
        }
    }

    /// Section name in the configuration document.
    pub fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for CameraSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoding used for streamed frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Hardware-encoded continuous bitstream.
    #[default]
    H264,
    /// Independently compressed still frames.
    #[serde(alias = "mjpeg")]
    Jpeg,
    /// Uncompressed image buffers.
    Raw,
}

impl StreamFormat {
    /// Returns the wire name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Jpeg => "jpeg",
            Self::Raw => "raw",
        }
    }

    /// True for formats that produce a continuous bitstream rather than
    /// self-contained frames.
    pub fn is_bitstream(&self) -> bool {
        matches!(self, Self::H264)
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" => Ok(Self::H264),
            "jpeg" | "mjpeg" => Ok(Self::Jpeg),
            "raw" => Ok(Self::Raw),
            other => Err(format!("unknown stream format: {other}")),
        }
    }
}

/// Settings for a single camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Whether the camera takes part in streaming and captures.
    pub enabled: bool,
    /// Sensor output resolution.
    pub resolution: Resolution,
    /// Frames per second.
    pub framerate: u32,
    /// Sensor pixel format (e.g. `RGB888`).
    pub format: String,
    /// Settings passed through to the camera backend (exposure, gain...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: Resolution::HD,
            framerate: 30,
            format: "RGB888".to_string(),
            extra: Map::new(),
        }
    }
}

/// Per-camera sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSet {
    pub left: CameraConfig,
    pub right: CameraConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CameraSet {
    /// Returns the section for one side.
    pub fn get(&self, side: CameraSide) -> &CameraConfig {
        match side {
            CameraSide::Left => &self.left,
            CameraSide::Right => &self.right,
        }
    }
}

/// Stream-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Encoding of streamed frames.
    pub format: StreamFormat,
    /// Encoder quality (CRF for h264, 1-100 for jpeg).
    pub quality: u8,
    /// Target bitrate in bits per second (bitstream formats only).
    pub bitrate: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::H264,
            quality: 23,
            bitrate: 2_000_000,
            extra: Map::new(),
        }
    }
}

/// The full, persisted device configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub camera: CameraSet,
    pub stream: StreamConfig,
    /// Top-level sections owned by other components, e.g. `server`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceConfig {
    /// Returns the configuration as a JSON document.
    pub fn to_value(&self) -> ConfigResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Applies a partial update and returns the resulting configuration.
    ///
    /// `self` is left untouched; the caller decides whether to commit the
    /// result. Fails if the update is not an object or the merged document
    /// does not validate.
    pub fn merged(&self, patch: &Value) -> ConfigResult<Self> {
        if !patch.is_object() {
            return Err(ConfigError::NotAnObject(json_kind(patch)));
        }
        let mut document = self.to_value()?;
        merge_json(&mut document, patch);
        let merged: DeviceConfig = serde_json::from_value(document)?;
        merged.validate()?;
        Ok(merged)
    }

    /// Checks value ranges the type system does not cover.
    pub fn validate(&self) -> ConfigResult<()> {
        for side in CameraSide::ALL {
            let camera = self.camera.get(side);
            if camera.framerate == 0 || camera.framerate > 240 {
                return Err(ConfigError::out_of_range(
                    format!("camera.{side}.framerate"),
                    format!("{} is not within 1..=240", camera.framerate),
                ));
            }
            if camera.format.trim().is_empty() {
                return Err(ConfigError::out_of_range(
                    format!("camera.{side}.format"),
                    "pixel format must not be empty",
                ));
            }
        }
        if self.stream.quality > 100 {
            return Err(ConfigError::out_of_range(
                "stream.quality",
                format!("{} is not within 0..=100", self.stream.quality),
            ));
        }
        Ok(())
    }

    /// Cameras whose section differs between `self` and `other`.
    pub fn changed_cameras(&self, other: &DeviceConfig) -> Vec<CameraSide> {
        CameraSide::ALL
            .into_iter()
            .filter(|side| self.camera.get(*side) != other.camera.get(*side))
            .collect()
    }

    /// True if the stream-wide section differs.
    pub fn stream_changed(&self, other: &DeviceConfig) -> bool {
        self.stream != other.stream
    }
}

/// Recursively merges `patch` into `target`.
///
/// Objects are merged key by key; any other value in `patch` replaces the
/// value in `target`. Keys absent from `patch` are never removed.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
