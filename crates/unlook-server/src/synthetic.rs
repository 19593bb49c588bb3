//! Test-pattern cameras.
//!
//! Used when the daemon runs without camera hardware. Each camera renders a
//! moving diagonal gradient, paced by its configured framerate. Compressed
//! formats carry a luma thumbnail (one byte per 8x8 block) rather than a real
//! bitstream.

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use unlook_core::{CameraConfig, CameraSide, Resolution, StreamFormat, unix_timestamp};

use crate::camera::{Camera, CameraBackend, CameraError, CameraResult, StillImage, StreamSettings};

const BLOCK: u32 = 8;

/// Backend producing [`SyntheticCamera`]s for every side.
#[derive(Debug, Default)]
pub struct SyntheticBackend {
    /// Sides to leave out, as if not detected.
    pub missing: Vec<CameraSide>,
}

impl CameraBackend for SyntheticBackend {
    fn open(&mut self, side: CameraSide) -> CameraResult<Box<dyn Camera>> {
        if self.missing.contains(&side) {
            return Err(CameraError::init(side, "no synthetic camera for this side"));
        }
        Ok(Box::new(SyntheticCamera::new(side)))
    }
}

/// A camera drawing a test pattern.
#[derive(Debug)]
pub struct SyntheticCamera {
    side: CameraSide,
    config: CameraConfig,
    session: Option<Session>,
}

#[derive(Debug)]
struct Session {
    settings: StreamSettings,
    next_due: Instant,
    tick: u64,
}

impl SyntheticCamera {
    pub fn new(side: CameraSide) -> Self {
        Self {
            side,
            config: CameraConfig::default(),
            session: None,
        }
    }

    fn frame_interval(framerate: u32) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(framerate.max(1)))
    }
}

impl Camera for SyntheticCamera {
    fn configure(&mut self, config: &CameraConfig) -> CameraResult<()> {
        if self.session.is_some() {
            return Err(CameraError::Configure(
                "cannot reconfigure while streaming".to_string(),
            ));
        }
        if config.framerate == 0 {
            return Err(CameraError::Configure("framerate must be positive".to_string()));
        }
        self.config = config.clone();
        Ok(())
    }

    fn capture(&mut self, _timeout: Duration) -> CameraResult<StillImage> {
        let phase = (unix_timestamp() * 10.0) as u64;
        Ok(StillImage {
            side: self.side,
            resolution: self.config.resolution,
            pixel_format: self.config.format.clone(),
            timestamp: unix_timestamp(),
            data: rgb_pattern(self.config.resolution, phase, self.side),
        })
    }

    fn start_stream(&mut self, settings: &StreamSettings) -> CameraResult<()> {
        self.session = Some(Session {
            settings: *settings,
            next_due: Instant::now(),
            tick: 0,
        });
        Ok(())
    }

    fn next_chunk(&mut self, timeout: Duration) -> CameraResult<Option<Bytes>> {
        let side = self.side;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CameraError::stream("stream is not open"))?;

        let now = Instant::now();
        if session.next_due > now {
            let wait = session.next_due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }
        session.next_due += Self::frame_interval(session.settings.framerate);
        session.tick += 1;

        let payload = match session.settings.format {
            StreamFormat::Raw => rgb_pattern(session.settings.resolution, session.tick, side),
            StreamFormat::H264 | StreamFormat::Jpeg => {
                luma_thumbnail(session.settings.resolution, session.tick, side)
            }
        };
        Ok(Some(payload))
    }

    fn stop_stream(&mut self) {
        self.session = None;
    }
}

fn shade(x: u32, y: u32, phase: u64, side: CameraSide) -> u8 {
    let offset = if side == CameraSide::Right { 64 } else { 0 };
    ((u64::from(x) + u64::from(y) + phase * 4 + offset) % 256) as u8
}

fn rgb_pattern(resolution: Resolution, phase: u64, side: CameraSide) -> Bytes {
    let (width, height) = resolution.as_tuple();
    let mut buffer = BytesMut::with_capacity(resolution.pixel_count() as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let value = shade(x, y, phase, side);
            buffer.put_slice(&[value, value / 2, 255 - value]);
        }
    }
    buffer.freeze()
}

fn luma_thumbnail(resolution: Resolution, phase: u64, side: CameraSide) -> Bytes {
    let width = resolution.width().div_ceil(BLOCK);
    let height = resolution.height().div_ceil(BLOCK);
    let mut buffer = BytesMut::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            buffer.put_u8(shade(x * BLOCK, y * BLOCK, phase, side));
        }
    }
    buffer.freeze()
}
