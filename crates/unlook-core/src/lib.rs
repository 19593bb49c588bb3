//! Core types for the UnLook scanner: resolution, device configuration,
//! identity, runtime state, timestamps and logging setup.

pub mod config;
pub mod identity;
pub mod resolution;
pub mod state;
pub mod time;
pub mod tracing;

pub use config::{
    CameraConfig, CameraSet, CameraSide, ConfigError, ConfigResult, DeviceConfig, StreamConfig,
    StreamFormat, merge_json,
};
pub use identity::{Capabilities, DeviceIdentity, display_name};
pub use resolution::{InvalidResolution, Resolution};
pub use state::{DeviceState, LifecycleStatus, StateSnapshot};
pub use time::{format_duration, unix_timestamp};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
