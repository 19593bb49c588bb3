//! Camera capability.
//!
//! Hardware access sits behind the blocking [`Camera`] trait. The server never
//! calls a camera from an async task directly: producers run on the blocking
//! pool and one-off calls (configure, capture) go through `spawn_blocking`.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use unlook_core::{CameraConfig, CameraSide, Resolution, StreamConfig, StreamFormat};

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Errors reported by cameras.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The camera could not be opened at startup.
    #[error("failed to initialise {side} camera: {reason}")]
    Init { side: CameraSide, reason: String },

    /// The camera rejected a configuration.
    #[error("invalid camera configuration: {0}")]
    Configure(String),

    /// A capture or encode step failed. Usually transient.
    #[error("stream error: {0}")]
    Stream(String),

    /// No image arrived within the allotted time.
    #[error("camera timed out after {0:?}")]
    Timeout(Duration),

    /// The camera is owned by a running producer or was lost.
    #[error("{0} camera is not available")]
    Unavailable(CameraSide),

    /// A blocking camera call panicked.
    #[error("camera task failed: {0}")]
    Task(String),
}

impl CameraError {
    pub fn init(side: CameraSide, reason: impl Into<String>) -> Self {
        Self::Init {
            side,
            reason: reason.into(),
        }
    }

    pub fn stream(reason: impl Into<String>) -> Self {
        Self::Stream(reason.into())
    }
}

/// Per-session stream parameters, fixed when a producer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub format: StreamFormat,
    pub quality: u8,
    pub bitrate: u32,
    pub resolution: Resolution,
    pub framerate: u32,
}

impl StreamSettings {
    /// Combines a camera section with the stream-wide section.
    pub fn for_camera(camera: &CameraConfig, stream: &StreamConfig) -> Self {
        Self {
            format: stream.format,
            quality: stream.quality,
            bitrate: stream.bitrate,
            resolution: camera.resolution,
            framerate: camera.framerate,
        }
    }
}

/// One captured still.
#[derive(Debug, Clone, PartialEq)]
pub struct StillImage {
    pub side: CameraSide,
    pub resolution: Resolution,
    /// Pixel format of `data`, e.g. `RGB888`.
    pub pixel_format: String,
    /// Capture time in epoch seconds.
    pub timestamp: f64,
    pub data: Bytes,
}

/// A blocking camera device.
pub trait Camera: Send {
    /// Applies sensor settings. Called with no stream open.
    fn configure(&mut self, config: &CameraConfig) -> CameraResult<()>;

    /// Captures one still, waiting at most `timeout`.
    fn capture(&mut self, timeout: Duration) -> CameraResult<StillImage>;

    /// Opens the encoder for a stream session.
    fn start_stream(&mut self, settings: &StreamSettings) -> CameraResult<()>;

    /// Returns the next encoded chunk, or `None` if nothing arrived within
    /// `timeout`.
    fn next_chunk(&mut self, timeout: Duration) -> CameraResult<Option<Bytes>>;

    /// Closes the encoder opened by [`Camera::start_stream`].
    fn stop_stream(&mut self);
}

/// Opens cameras at startup.
pub trait CameraBackend: Send {
    fn open(&mut self, side: CameraSide) -> CameraResult<Box<dyn Camera>>;
}

/// A camera together with its position and the settings last applied.
pub struct CameraHandle {
    pub side: CameraSide,
    camera: Box<dyn Camera>,
    applied: Option<CameraConfig>,
}

impl fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraHandle")
            .field("side", &self.side)
            .field("applied", &self.applied)
            .finish_non_exhaustive()
    }
}

impl CameraHandle {
    pub fn new(side: CameraSide, camera: Box<dyn Camera>) -> Self {
        Self {
            side,
            camera,
            applied: None,
        }
    }

    /// Configures the camera unless `config` is already applied.
    pub fn ensure_configured(&mut self, config: &CameraConfig) -> CameraResult<()> {
        if self.applied.as_ref() == Some(config) {
            return Ok(());
        }
        self.applied = None;
        self.camera.configure(config)?;
        self.applied = Some(config.clone());
        Ok(())
    }

    pub fn camera_mut(&mut self) -> &mut dyn Camera {
        self.camera.as_mut()
    }
}

/// Opens every camera the backend can provide.
///
/// A camera that fails to open is logged and left out; the server carries on
/// with the remaining ones.
pub fn open_cameras(backend: &mut dyn CameraBackend) -> Vec<CameraHandle> {
    let mut cameras = Vec::new();
    for side in CameraSide::ALL {
        match backend.open(side) {
            Ok(camera) => {
                info!(camera = %side, "Camera initialised");
                cameras.push(CameraHandle::new(side, camera));
            }
            Err(e) => warn!(camera = %side, error = %e, "Camera unavailable, continuing without it"),
        }
    }
    cameras
}

/// Receives stills taken by CaptureFrame.
pub trait CaptureSink: Send {
    fn deliver(&mut self, images: Vec<StillImage>) -> CameraResult<()>;
}

/// Sink that only logs what it receives.
#[derive(Debug, Default)]
pub struct LogSink;

impl CaptureSink for LogSink {
    fn deliver(&mut self, images: Vec<StillImage>) -> CameraResult<()> {
        for image in &images {
            info!(
                camera = %image.side,
                resolution = %image.resolution,
                pixel_format = %image.pixel_format,
                bytes = image.data.len(),
                "Captured still"
            );
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn failed_cameras_are_excluded() {
        let mut backend = ScriptedBackend {
            fail: Some(CameraSide::Left),
        };
        let cameras = open_cameras(&mut backend);
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].side, CameraSide::Right);
    }

    #[test]
    fn configure_is_skipped_when_unchanged() {
        let (camera, calls) = ScriptedCamera::new(CameraSide::Left);
        let mut handle = CameraHandle::new(CameraSide::Left, Box::new(camera));
        let config = CameraConfig::default();

        handle.ensure_configured(&config).unwrap();
        handle.ensure_configured(&config).unwrap();
        assert_eq!(calls.lock().unwrap().configured.len(), 1);

        let changed = CameraConfig {
            framerate: 15,
            ..config
        };
        handle.ensure_configured(&changed).unwrap();
        assert_eq!(calls.lock().unwrap().configured.len(), 2);
    }

    #[test]
    fn stream_settings_combine_sections() {
        let camera = CameraConfig {
            framerate: 10,
            ..CameraConfig::default()
        };
        let stream = StreamConfig {
            format: StreamFormat::Jpeg,
            quality: 90,
            bitrate: 1,
            ..StreamConfig::default()
        };
        let settings = StreamSettings::for_camera(&camera, &stream);
        assert_eq!(settings.framerate, 10);
        assert_eq!(settings.format, StreamFormat::Jpeg);
        assert_eq!(settings.quality, 90);
        assert_eq!(settings.resolution, Resolution::HD);
    }

    #[test]
    fn log_sink_accepts_images() {
        let mut sink = LogSink;
        let (mut camera, _) = ScriptedCamera::new(CameraSide::Right);
        let image = camera.capture(Duration::from_millis(10)).unwrap();
        assert!(sink.deliver(vec![image]).is_ok());
    }
}
