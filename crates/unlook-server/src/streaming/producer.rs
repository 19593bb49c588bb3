//! Per-camera frame producer.
//!
//! A producer runs on the blocking pool and owns its camera for the whole
//! session. Each iteration pulls one chunk, stamps it with the next sequence
//! number and publishes it pre-framed on the broadcast channel. Whether the
//! encoder opened is reported once, before the first chunk.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, info_span, warn};

use unlook_core::{CameraConfig, unix_timestamp};
use unlook_protocol::{Frame, FrameHeader, FrameLimits, Message, ProtocolResult, encode, encode_parts};

use crate::camera::{CameraHandle, CameraResult, StreamSettings};

/// Everything a producer needs, fixed at start.
pub(crate) struct ProducerContext {
    pub camera_config: CameraConfig,
    pub settings: StreamSettings,
    pub frames: broadcast::Sender<Bytes>,
    /// Cleared when the whole stream stops.
    pub streaming: Arc<AtomicBool>,
    /// Set to stop only this producer.
    pub stop: Arc<AtomicBool>,
    pub chunk_timeout: Duration,
    /// Pause after a failed chunk before trying again.
    pub error_backoff: Duration,
}

impl ProducerContext {
    fn should_run(&self) -> bool {
        self.streaming.load(Ordering::Acquire) && !self.stop.load(Ordering::Acquire)
    }
}

/// Runs one stream session and hands the camera back when it ends.
///
/// The outcome of configuring the camera and opening its encoder is sent on
/// `ready`; on failure the producer returns without streaming.
pub(crate) fn run_producer(
    mut handle: CameraHandle,
    ctx: ProducerContext,
    ready: oneshot::Sender<CameraResult<()>>,
) -> CameraHandle {
    let side = handle.side;
    let _span = info_span!("producer", camera = %side).entered();

    let setup = handle
        .ensure_configured(&ctx.camera_config)
        .and_then(|()| handle.camera_mut().start_stream(&ctx.settings));
    if let Err(e) = setup {
        error!(error = %e, "Failed to start camera stream, producer not started");
        let _ = ready.send(Err(e));
        return handle;
    }
    if ready.send(Ok(())).is_err() {
        debug!("Start no longer awaited");
    }
    info!(
        format = %ctx.settings.format,
        resolution = %ctx.settings.resolution,
        framerate = ctx.settings.framerate,
        "Producer started"
    );

    let mut sequence: u64 = 0;
    let mut errors: u64 = 0;
    while ctx.should_run() {
        let payload = match handle.camera_mut().next_chunk(ctx.chunk_timeout) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e) => {
                errors += 1;
                warn!(error = %e, frame = sequence, "Frame skipped");
                if ctx.should_run() {
                    std::thread::sleep(ctx.error_backoff);
                }
                continue;
            }
        };

        let header = FrameHeader {
            camera: side.index(),
            frame: sequence,
            timestamp: unix_timestamp(),
            format: ctx.settings.format,
            resolution: ctx.settings.resolution,
        };
        match publish(&ctx.frames, Frame::new(header, payload)) {
            Ok(receivers) => {
                if sequence == 0 {
                    debug!(receivers, "First frame published");
                }
                sequence += 1;
            }
            Err(e) => {
                errors += 1;
                warn!(error = %e, frame = sequence, "Failed to encode frame, skipped");
            }
        }
    }

    handle.camera_mut().stop_stream();
    info!(frames = sequence, errors, "Producer stopped");
    handle
}

/// Frames and broadcasts one frame. Returns the number of receivers.
fn publish(frames: &broadcast::Sender<Bytes>, frame: Frame) -> ProtocolResult<usize> {
    let parts = encode(&Message::Frame(frame))?;
    let wire = encode_parts(&parts, FrameLimits::STREAM)?;
    // Sending with no subscribers is not an error: the frame is simply unseen.
    Ok(frames.send(wire).unwrap_or(0))
}

/// Decodes a pre-framed broadcast message back into a frame.
#[cfg(test)]
pub(crate) async fn decode_wire(wire: &Bytes) -> Frame {
    use unlook_protocol::{FrameReader, decode};
    let mut reader = FrameReader::new(&wire[..], FrameLimits::STREAM);
    let parts = reader.read_message().await.unwrap().unwrap();
    match decode(&parts).unwrap() {
        Message::Frame(frame) => frame,
        other => panic!("expected a frame, got {other:?}"),
    }
}
