//! Streaming publisher.
//!
//! The publisher owns every camera. While idle a camera sits in its slot and
//! can be borrowed for one-off blocking calls (stills). Starting a stream
//! moves each enabled camera into its own producer on the blocking pool;
//! stopping hands it back. A start only counts once the producer reports
//! its encoder open. Frames from all producers go to one broadcast
//! channel, which the fan-out server forwards to subscribers.

mod fanout;
mod producer;

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use unlook_core::{CameraSide, DeviceConfig, StreamConfig};

use crate::camera::{CameraError, CameraHandle, CameraResult, StillImage, StreamSettings};

pub use fanout::StreamServer;
use producer::{ProducerContext, run_producer};

/// Timing knobs for producers.
#[derive(Debug, Clone, Copy)]
pub struct PublisherOptions {
    /// Bounded wait for one chunk.
    pub chunk_timeout: Duration,
    /// How long a start waits for a producer to open its encoder.
    pub start_timeout: Duration,
    /// How long a stop waits for a producer to exit.
    pub stop_timeout: Duration,
    /// Pause after a failed chunk.
    pub error_backoff: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            error_backoff: Duration::from_millis(10),
        }
    }
}

struct Producer {
    stop: Arc<AtomicBool>,
    join: JoinHandle<CameraHandle>,
}

enum Slot {
    /// Camera available for configuration and stills.
    Idle(CameraHandle),
    /// Camera owned by a running producer.
    Streaming(Producer),
    /// Stop timed out; the camera comes back once the producer exits.
    Draining(Producer),
    /// The camera was lost to a failed task.
    Lost,
}

impl Slot {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle(_) => "idle",
            Self::Streaming(_) => "streaming",
            Self::Draining(_) => "draining",
            Self::Lost => "lost",
        }
    }
}

/// Owns the cameras and their producers.
pub struct StreamingPublisher {
    slots: Vec<(CameraSide, Slot)>,
    frames: broadcast::Sender<Bytes>,
    streaming: Arc<AtomicBool>,
    options: PublisherOptions,
}

impl StreamingPublisher {
    pub fn new(
        cameras: Vec<CameraHandle>,
        frames: broadcast::Sender<Bytes>,
        options: PublisherOptions,
    ) -> Self {
        Self {
            slots: cameras
                .into_iter()
                .map(|handle| (handle.side, Slot::Idle(handle)))
                .collect(),
            frames,
            streaming: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    /// Number of cameras the publisher was created with.
    pub fn camera_count(&self) -> usize {
        self.slots.len()
    }

    /// True while a stream session is active.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Cameras currently owned by a producer.
    pub fn streaming_cameras(&self) -> Vec<CameraSide> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Streaming(_)))
            .map(|(side, _)| *side)
            .collect()
    }

    /// True if any camera the publisher holds is enabled in `config`.
    pub fn has_enabled_camera(&self, config: &DeviceConfig) -> bool {
        self.slots
            .iter()
            .any(|(side, _)| config.camera.get(*side).enabled)
    }

    /// Subscribes to the pre-framed frame feed.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }

    /// Starts a session: one producer per enabled, idle camera.
    ///
    /// Returns the cameras whose encoder opened. The session only begins if
    /// at least one did.
    pub async fn start(&mut self, config: &DeviceConfig, stream: &StreamConfig) -> Vec<CameraSide> {
        self.reclaim().await;
        self.streaming.store(true, Ordering::Release);

        let mut started = Vec::new();
        for index in 0..self.slots.len() {
            if self.spawn_producer(index, config, stream).await {
                started.push(self.slots[index].0);
            }
        }

        if started.is_empty() {
            self.streaming.store(false, Ordering::Release);
            warn!("No camera started streaming, session not started");
        } else {
            info!(cameras = ?started, format = %stream.format, "Streaming started");
        }
        started
    }

    /// Ends the session and waits (bounded) for every producer to exit.
    pub async fn stop(&mut self) {
        self.streaming.store(false, Ordering::Release);
        let indices: Vec<usize> = (0..self.slots.len()).collect();
        self.stop_producers(&indices).await;
        info!("Streaming stopped");
    }

    /// Restarts the producers of `sides` with new settings.
    ///
    /// Streaming cameras are stopped and, if still enabled, started again;
    /// idle cameras that became enabled are started. Returns the cameras that
    /// are streaming with the new settings. If no producer remains the
    /// session ends.
    pub async fn restart(
        &mut self,
        sides: &[CameraSide],
        config: &DeviceConfig,
        stream: &StreamConfig,
    ) -> Vec<CameraSide> {
        if !self.is_streaming() {
            return Vec::new();
        }
        self.reclaim().await;

        let indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, (side, _))| sides.contains(side))
            .map(|(index, _)| index)
            .collect();

        self.stop_producers(&indices).await;
        let mut restarted = Vec::new();
        for &index in &indices {
            if self.spawn_producer(index, config, stream).await {
                restarted.push(self.slots[index].0);
            }
        }

        if self.streaming_cameras().is_empty() {
            self.streaming.store(false, Ordering::Release);
            info!("No cameras left streaming, session ended");
        }
        debug!(cameras = ?restarted, "Producers restarted");
        restarted
    }

    /// Captures one still from every enabled camera.
    ///
    /// Fails if a camera is busy streaming or any capture fails.
    pub async fn capture(
        &mut self,
        config: &DeviceConfig,
        timeout: Duration,
    ) -> CameraResult<Vec<StillImage>> {
        self.reclaim().await;

        let mut images = Vec::new();
        for index in 0..self.slots.len() {
            let side = self.slots[index].0;
            let camera_config = config.camera.get(side).clone();
            if !camera_config.enabled {
                continue;
            }
            let image = self
                .with_idle_camera(index, move |handle| {
                    handle.ensure_configured(&camera_config)?;
                    handle.camera_mut().capture(timeout)
                })
                .await?;
            images.push(image);
        }
        Ok(images)
    }

    /// Stops any session and drops the cameras.
    pub async fn release(mut self) {
        if self.is_streaming() {
            self.stop().await;
        }
        self.reclaim().await;
        for (side, slot) in &self.slots {
            debug!(camera = %side, state = slot.label(), "Releasing camera");
        }
        self.slots.clear();
    }

    /// Moves an idle, enabled camera into a new producer and waits for its
    /// encoder to open. A camera that fails to start goes back to its slot.
    async fn spawn_producer(
        &mut self,
        index: usize,
        config: &DeviceConfig,
        stream: &StreamConfig,
    ) -> bool {
        let side = self.slots[index].0;
        let camera_config = config.camera.get(side);
        if !camera_config.enabled {
            return false;
        }

        let slot = mem::replace(&mut self.slots[index].1, Slot::Lost);
        let handle = match slot {
            Slot::Idle(handle) => handle,
            other => {
                debug!(camera = %side, state = other.label(), "Camera not idle, not starting");
                self.slots[index].1 = other;
                return false;
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = ProducerContext {
            camera_config: camera_config.clone(),
            settings: StreamSettings::for_camera(camera_config, stream),
            frames: self.frames.clone(),
            streaming: self.streaming.clone(),
            stop: stop.clone(),
            chunk_timeout: self.options.chunk_timeout,
            error_backoff: self.options.error_backoff,
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let join = tokio::task::spawn_blocking(move || run_producer(handle, ctx, ready_tx));
        let producer = Producer { stop, join };

        let stop_timeout = self.options.stop_timeout;
        match tokio::time::timeout(self.options.start_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                self.slots[index].1 = Slot::Streaming(producer);
                true
            }
            Ok(Ok(Err(e))) => {
                warn!(camera = %side, error = %e, "Camera failed to start streaming");
                self.slots[index].1 = Self::await_producer(stop_timeout, side, producer).await;
                false
            }
            // Sender dropped without a report: the producer task failed.
            Ok(Err(_)) => {
                self.slots[index].1 = Self::await_producer(stop_timeout, side, producer).await;
                false
            }
            Err(_) => {
                warn!(
                    camera = %side,
                    timeout = ?self.options.start_timeout,
                    "Camera did not start streaming in time"
                );
                producer.stop.store(true, Ordering::Release);
                self.slots[index].1 = Slot::Draining(producer);
                false
            }
        }
    }

    async fn stop_producers(&mut self, indices: &[usize]) {
        for &index in indices {
            if let Slot::Streaming(producer) = &self.slots[index].1 {
                producer.stop.store(true, Ordering::Release);
            }
        }

        let stop_timeout = self.options.stop_timeout;
        for &index in indices {
            let side = self.slots[index].0;
            let slot = mem::replace(&mut self.slots[index].1, Slot::Lost);
            self.slots[index].1 = match slot {
                Slot::Streaming(producer) => {
                    Self::await_producer(stop_timeout, side, producer).await
                }
                other => other,
            };
        }
    }

    /// Waits at most `stop_timeout` for a producer to hand its camera back.
    async fn await_producer(
        stop_timeout: Duration,
        side: CameraSide,
        mut producer: Producer,
    ) -> Slot {
        match tokio::time::timeout(stop_timeout, &mut producer.join).await {
            Ok(Ok(handle)) => Slot::Idle(handle),
            Ok(Err(e)) => {
                error!(camera = %side, error = %e, "Producer task failed, camera lost");
                Slot::Lost
            }
            Err(_) => {
                warn!(
                    camera = %side,
                    timeout = ?stop_timeout,
                    "Producer did not stop in time, camera unavailable until it exits"
                );
                Slot::Draining(producer)
            }
        }
    }

    /// Takes back cameras from producers that exited after their stop timed
    /// out.
    async fn reclaim(&mut self) {
        for index in 0..self.slots.len() {
            let finished =
                matches!(&self.slots[index].1, Slot::Draining(producer) if producer.join.is_finished());
            if !finished {
                continue;
            }
            let side = self.slots[index].0;
            if let Slot::Draining(producer) = mem::replace(&mut self.slots[index].1, Slot::Lost) {
                self.slots[index].1 = match producer.join.await {
                    Ok(handle) => {
                        info!(camera = %side, "Camera reclaimed from stopped producer");
                        Slot::Idle(handle)
                    }
                    Err(e) => {
                        error!(camera = %side, error = %e, "Producer task failed, camera lost");
                        Slot::Lost
                    }
                };
            }
        }
    }

    /// Runs a blocking call on an idle camera and puts it back afterwards.
    async fn with_idle_camera<T, F>(&mut self, index: usize, f: F) -> CameraResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut CameraHandle) -> CameraResult<T> + Send + 'static,
    {
        let side = self.slots[index].0;
        let slot = mem::replace(&mut self.slots[index].1, Slot::Lost);
        let mut handle = match slot {
            Slot::Idle(handle) => handle,
            other => {
                self.slots[index].1 = other;
                return Err(CameraError::Unavailable(side));
            }
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&mut handle);
            (handle, result)
        })
        .await;

        match joined {
            Ok((handle, result)) => {
                self.slots[index].1 = Slot::Idle(handle);
                result
            }
            Err(e) => {
                error!(camera = %side, error = %e, "Camera task failed, camera lost");
                Err(CameraError::Task(e.to_string()))
            }
        }
    }
}

impl Drop for StreamingPublisher {
    fn drop(&mut self) {
        // Producers run on the blocking pool and only exit when told to.
        self.streaming.store(false, Ordering::Release);
        for (_, slot) in &self.slots {
            if let Slot::Streaming(producer) | Slot::Draining(producer) = slot {
                producer.stop.store(true, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::camera::testing::{Calls, ScriptedCamera};
    use serde_json::json;
    use std::sync::Mutex;

    fn publisher_with(
        sides: &[CameraSide],
    ) -> (StreamingPublisher, Vec<Arc<Mutex<Calls>>>) {
        publisher_from(sides.iter().map(|&side| ScriptedCamera::new(side).0).collect())
    }

    pub(crate) fn publisher_from(
        cameras: Vec<ScriptedCamera>,
    ) -> (StreamingPublisher, Vec<Arc<Mutex<Calls>>>) {
        let calls = cameras.iter().map(|camera| camera.calls.clone()).collect();
        let handles = cameras
            .into_iter()
            .map(|camera| CameraHandle::new(camera.side, Box::new(camera)))
            .collect();
        let (tx, _) = broadcast::channel(1024);
        let options = PublisherOptions {
            chunk_timeout: Duration::from_millis(20),
            start_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(2),
            error_backoff: Duration::from_millis(1),
        };
        (StreamingPublisher::new(handles, tx, options), calls)
    }

    fn failing(side: CameraSide) -> ScriptedCamera {
        let (mut camera, _) = ScriptedCamera::new(side);
        camera.fail_start = true;
        camera
    }

    #[tokio::test]
    async fn start_and_stop_hand_cameras_back() {
        let (mut publisher, calls) = publisher_with(&CameraSide::ALL);
        let config = DeviceConfig::default();

        let started = publisher.start(&config, &config.stream).await;
        assert_eq!(started, vec![CameraSide::Left, CameraSide::Right]);
        assert!(publisher.is_streaming());
        assert_eq!(publisher.streaming_cameras().len(), 2);

        publisher.stop().await;
        assert!(!publisher.is_streaming());
        assert!(publisher.streaming_cameras().is_empty());
        for camera_calls in &calls {
            let camera_calls = camera_calls.lock().unwrap();
            assert_eq!(camera_calls.started.len(), 1);
            assert_eq!(camera_calls.stopped, 1);
        }

        // Cameras are idle again and can take stills.
        let images = publisher.capture(&config, Duration::from_secs(1)).await.unwrap();
        assert_eq!(images.len(), 2);
    }

    #[tokio::test]
    async fn disabled_cameras_are_not_started() {
        let (mut publisher, _calls) = publisher_with(&CameraSide::ALL);
        let config = DeviceConfig::default()
            .merged(&json!({"camera": {"left": {"enabled": false}}}))
            .unwrap();

        let started = publisher.start(&config, &config.stream).await;
        assert_eq!(started, vec![CameraSide::Right]);
        publisher.stop().await;
    }

    #[tokio::test]
    async fn nothing_enabled_means_no_session() {
        let (mut publisher, _calls) = publisher_with(&[CameraSide::Left]);
        let config = DeviceConfig::default()
            .merged(&json!({"camera": {"left": {"enabled": false}}}))
            .unwrap();

        assert!(publisher.start(&config, &config.stream).await.is_empty());
        assert!(!publisher.is_streaming());
    }

    #[tokio::test]
    async fn camera_that_fails_to_start_is_left_out() {
        let (mut publisher, calls) = publisher_from(vec![
            failing(CameraSide::Left),
            ScriptedCamera::new(CameraSide::Right).0,
        ]);
        let config = DeviceConfig::default();

        let started = publisher.start(&config, &config.stream).await;
        assert_eq!(started, vec![CameraSide::Right]);
        assert_eq!(publisher.streaming_cameras(), vec![CameraSide::Right]);
        assert_eq!(calls[1].lock().unwrap().started.len(), 1);

        publisher.stop().await;
        // The failed camera went straight back to idle.
        let images = publisher.capture(&config, Duration::from_secs(1)).await.unwrap();
        assert_eq!(images.len(), 2);
    }

    #[tokio::test]
    async fn no_session_when_every_start_fails() {
        let (mut publisher, calls) =
            publisher_from(vec![failing(CameraSide::Left), failing(CameraSide::Right)]);
        let config = DeviceConfig::default();

        assert!(publisher.start(&config, &config.stream).await.is_empty());
        assert!(!publisher.is_streaming());
        assert!(publisher.streaming_cameras().is_empty());
        for camera_calls in &calls {
            assert_eq!(camera_calls.lock().unwrap().stopped, 0);
        }
    }

    #[tokio::test]
    async fn dropping_the_publisher_stops_producers() {
        let (mut publisher, calls) = publisher_with(&CameraSide::ALL);
        let config = DeviceConfig::default();
        publisher.start(&config, &config.stream).await;
        drop(publisher);

        let stopped = async {
            while calls.iter().any(|c| c.lock().unwrap().stopped == 0) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), stopped)
            .await
            .expect("producers kept running after drop");
    }

    #[tokio::test]
    async fn capture_refused_while_streaming() {
        let (mut publisher, _calls) = publisher_with(&[CameraSide::Left]);
        let config = DeviceConfig::default();
        publisher.start(&config, &config.stream).await;

        let result = publisher.capture(&config, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CameraError::Unavailable(CameraSide::Left))));
        publisher.stop().await;
    }

    #[tokio::test]
    async fn restart_applies_new_settings_and_toggles() {
        let (mut publisher, calls) = publisher_with(&CameraSide::ALL);
        let config = DeviceConfig::default();
        publisher.start(&config, &config.stream).await;

        let slower = config
            .merged(&json!({"camera": {"left": {"framerate": 15}}}))
            .unwrap();
        let touched = publisher
            .restart(&[CameraSide::Left], &slower, &slower.stream)
            .await;
        assert_eq!(touched, vec![CameraSide::Left]);
        {
            let left = calls[0].lock().unwrap();
            assert_eq!(left.started.len(), 2);
            assert_eq!(left.started[1].framerate, 15);
            let right = calls[1].lock().unwrap();
            assert_eq!(right.started.len(), 1);
        }

        let right_off = slower
            .merged(&json!({"camera": {"right": {"enabled": false}}}))
            .unwrap();
        publisher
            .restart(&[CameraSide::Right], &right_off, &right_off.stream)
            .await;
        assert_eq!(publisher.streaming_cameras(), vec![CameraSide::Left]);

        let all_off = right_off
            .merged(&json!({"camera": {"left": {"enabled": false}}}))
            .unwrap();
        publisher
            .restart(&[CameraSide::Left], &all_off, &all_off.stream)
            .await;
        assert!(!publisher.is_streaming());
    }

    #[tokio::test]
    async fn frames_reach_subscribers_with_per_camera_sequences() {
        let (mut publisher, _calls) = publisher_with(&CameraSide::ALL);
        let mut rx = publisher.subscribe();
        let config = DeviceConfig::default();
        publisher.start(&config, &config.stream).await;

        let mut next = [0u64; 2];
        let mut seen = 0;
        while seen < 20 {
            let wire = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let frame = producer::decode_wire(&wire).await;
            let camera = frame.header.camera as usize;
            assert_eq!(frame.header.frame, next[camera]);
            next[camera] += 1;
            seen += 1;
        }
        publisher.release().await;
    }
}
