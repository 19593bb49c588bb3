//! Control command dispatch.
//!
//! [`ControlHandler`] owns the device state, the configuration and the
//! streaming publisher, and turns each control request into a [`Response`].
//! [`ControlWorker`] feeds it from the connection tasks one request at a time.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{Span, debug, error, info, warn};

use unlook_core::{
    CameraSide, DeviceConfig, DeviceIdentity, DeviceState, LifecycleStatus, StreamConfig,
    unix_timestamp,
};
use unlook_protocol::{
    Message, MessageKind, ProtocolError, ProtocolResult, Response, StreamOptions, is_unknown_kind,
    malformed_kind,
};

use crate::camera::CaptureSink;
use crate::socket::ControlEvent;
use crate::signals::ShutdownHandle;
use crate::store::DeviceStore;
use crate::streaming::StreamingPublisher;

const UNKNOWN_COMMAND: &str = "unknown command";
const UNTAGGED: &str = "UNKNOWN";

/// Executes control commands against the device.
pub struct ControlHandler {
    identity: DeviceIdentity,
    config: DeviceConfig,
    state: DeviceState,
    publisher: StreamingPublisher,
    store: DeviceStore,
    sink: Box<dyn CaptureSink>,
    capture_timeout: Duration,
    /// StartStream overrides for the current session.
    overrides: StreamOptions,
}

impl ControlHandler {
    pub fn new(
        identity: DeviceIdentity,
        config: DeviceConfig,
        publisher: StreamingPublisher,
        store: DeviceStore,
        sink: Box<dyn CaptureSink>,
    ) -> Self {
        let state = DeviceState::new(publisher.camera_count());
        Self {
            identity,
            config,
            state,
            publisher,
            store,
            sink,
            capture_timeout: Duration::from_secs(5),
            overrides: StreamOptions::default(),
        }
    }

    #[must_use]
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn set_status(&mut self, status: LifecycleStatus) {
        debug!(%status, "Lifecycle status changed");
        self.state.status = status;
    }

    pub(crate) fn client_connected(&mut self) -> usize {
        self.state.clients_connected += 1;
        self.state.clients_connected
    }

    pub(crate) fn client_disconnected(&mut self) -> usize {
        self.state.clients_connected = self.state.clients_connected.saturating_sub(1);
        self.state.clients_connected
    }

    /// Answers a request, including ones that failed to decode.
    pub async fn dispatch(&mut self, message: ProtocolResult<Message>) -> Response {
        match message {
            Ok(message) => self.handle(message).await,
            Err(e) => Self::reject(&e),
        }
    }

    fn reject(error: &ProtocolError) -> Response {
        if is_unknown_kind(error) {
            let kind = malformed_kind(error).unwrap_or(UNTAGGED);
            debug!(kind, "Unknown command");
            return Response::error(kind, UNKNOWN_COMMAND);
        }
        warn!(error = %error, "Malformed control request");
        Response::error(malformed_kind(error).unwrap_or(UNTAGGED), error.to_string())
    }

    /// Handles a single decoded request and returns the response.
    #[tracing::instrument(skip_all, fields(request_type, duration_ms))]
    pub async fn handle(&mut self, message: Message) -> Response {
        let start = Instant::now();
        let kind = message.kind();
        Span::current().record("request_type", kind.tag());

        let response = match message {
            Message::Ping { timestamp } => {
                debug!(client_timestamp = timestamp, "Handling Ping");
                Response::ok(kind.tag()).with("timestamp", unix_timestamp())
            }
            Message::GetStatus => self.status(),
            Message::StartStream(options) => self.start_stream(options).await,
            Message::StopStream(_) => self.stop_stream().await,
            Message::SetConfig { config: Some(patch) } => self.set_config(&patch).await,
            Message::SetConfig { config: None } => {
                Response::error(kind.tag(), "missing configuration")
            }
            Message::GetConfig { .. } => match self.config.to_value() {
                Ok(document) => Response::ok(kind.tag()).with("config", document),
                Err(e) => Response::error(kind.tag(), e.to_string()),
            },
            Message::CaptureFrame => self.capture().await,
            Message::Disconnect => {
                debug!("Client asked to disconnect");
                Response::ok(kind.tag()).with("disconnected", true)
            }
            Message::Discover { .. }
            | Message::Announce(_)
            | Message::Response(_)
            | Message::Frame(_) => {
                debug!(kind = %kind, "Not a control command");
                Response::error(kind.tag(), UNKNOWN_COMMAND)
            }
        };

        let duration = start.elapsed();
        if tracing::enabled!(tracing::Level::DEBUG) {
            Span::current().record("duration_ms", duration.as_millis());
            debug!(
                request_type = kind.tag(),
                status = ?response.status,
                duration_ms = duration.as_millis(),
                "Request handled"
            );
        }
        response
    }

    fn status(&mut self) -> Response {
        self.state.streaming = self.publisher.is_streaming();
        let snapshot = self.state.snapshot();
        let tag = MessageKind::GetStatus.tag();
        Response::ok(tag)
            .try_with("state", &snapshot)
            .unwrap_or_else(|e| Response::error(tag, e.to_string()))
    }

    /// Stream settings for the session: persisted settings plus overrides.
    fn session_stream(&self) -> StreamConfig {
        let mut stream = self.config.stream.clone();
        if let Some(format) = self.overrides.format {
            stream.format = format;
        }
        if let Some(quality) = self.overrides.quality {
            stream.quality = quality;
        }
        stream
    }

    async fn start_stream(&mut self, options: StreamOptions) -> Response {
        let tag = MessageKind::StartStream.tag();
        if self.publisher.is_streaming() {
            return Response::ok(tag)
                .with("streaming", true)
                .with("message", "already streaming");
        }
        if let Some(quality) = options.quality
            && quality > 100
        {
            return Response::error(tag, format!("quality {quality} is not within 0..=100"));
        }

        self.overrides = options;
        let stream = self.session_stream();
        let started = self.publisher.start(&self.config, &stream).await;
        self.state.streaming = self.publisher.is_streaming();

        if started.is_empty() {
            self.overrides = StreamOptions::default();
            let reason = if self.publisher.has_enabled_camera(&self.config) {
                "failed to start streaming on any camera"
            } else {
                "no enabled cameras available"
            };
            return Response::error(tag, reason);
        }
        Response::ok(tag).with("streaming", true).with(
            "message",
            format!(
                "streaming {} from {}",
                stream.format,
                camera_names(&started).join(", ")
            ),
        )
    }

    async fn stop_stream(&mut self) -> Response {
        let tag = MessageKind::StopStream.tag();
        if !self.publisher.is_streaming() {
            return Response::ok(tag)
                .with("streaming", false)
                .with("message", "not streaming");
        }

        self.publisher.stop().await;
        self.overrides = StreamOptions::default();
        self.state.streaming = false;
        Response::ok(tag)
            .with("streaming", false)
            .with("message", "streaming stopped")
    }

    async fn set_config(&mut self, patch: &serde_json::Value) -> Response {
        let tag = MessageKind::SetConfig.tag();
        let updated = match self.config.merged(patch) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(error = %e, "Rejected configuration update");
                return Response::error(tag, format!("invalid configuration: {e}"));
            }
        };

        if let Err(e) = self.store.save_config(&updated) {
            warn!(error = %e, "Configuration applied but not persisted");
        }

        let affected: Vec<CameraSide> = if self.config.stream_changed(&updated) {
            CameraSide::ALL.to_vec()
        } else {
            self.config.changed_cameras(&updated)
        };
        self.config = updated;

        let restarted = if self.publisher.is_streaming() && !affected.is_empty() {
            let stream = self.session_stream();
            let restarted = self
                .publisher
                .restart(&affected, &self.config, &stream)
                .await;
            self.state.streaming = self.publisher.is_streaming();
            restarted
        } else {
            Vec::new()
        };

        info!(affected = ?affected, restarted = ?restarted, "Configuration updated");
        Response::ok(tag)
            .with("config_updated", true)
            .with("restarted", camera_names(&restarted))
    }

    async fn capture(&mut self) -> Response {
        let tag = MessageKind::CaptureFrame.tag();
        if self.publisher.is_streaming() {
            return Response::error(tag, "cannot capture while streaming");
        }

        let images = match self.publisher.capture(&self.config, self.capture_timeout).await {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                warn!("Capture requested with no enabled cameras");
                return Response::error(tag, "failed to capture frames");
            }
            Err(e) => {
                warn!(error = %e, "Capture failed");
                return Response::error(tag, "failed to capture frames");
            }
        };

        let timestamp = images
            .iter()
            .map(|image| image.timestamp)
            .fold(f64::NAN, f64::max);
        match self.sink.deliver(images) {
            Ok(()) => Response::ok(tag)
                .with("captured", true)
                .with("timestamp", timestamp),
            Err(e) => {
                warn!(error = %e, "Capture sink rejected stills");
                Response::error(tag, "failed to capture frames")
            }
        }
    }

    /// Ends any stream session and releases the cameras.
    pub async fn shutdown(mut self) {
        self.set_status(LifecycleStatus::Stopping);
        if self.publisher.is_streaming() {
            self.publisher.stop().await;
        }
        self.publisher.release().await;
    }

    pub(crate) async fn stop_streaming(&mut self) {
        if self.publisher.is_streaming() {
            self.publisher.stop().await;
            self.state.streaming = false;
        }
    }
}

fn camera_names(sides: &[CameraSide]) -> Vec<&'static str> {
    sides.iter().map(|side| side.name()).collect()
}

/// Serves control events one at a time.
pub struct ControlWorker {
    handler: ControlHandler,
    events: mpsc::Receiver<ControlEvent>,
    clients: watch::Sender<usize>,
    receive_timeout: Duration,
}

impl ControlWorker {
    /// Creates the worker and a receiver tracking the connected client count.
    pub fn new(
        handler: ControlHandler,
        events: mpsc::Receiver<ControlEvent>,
        receive_timeout: Duration,
    ) -> (Self, watch::Receiver<usize>) {
        let (clients, clients_rx) = watch::channel(0);
        (
            Self {
                handler,
                events,
                clients,
                receive_timeout,
            },
            clients_rx,
        )
    }

    /// Serves events until shutdown and hands the handler back.
    ///
    /// Each wait for an event is bounded by `receive_timeout` so shutdown is
    /// noticed even when no client is talking.
    pub async fn run(mut self, shutdown: ShutdownHandle) -> ControlHandler {
        self.handler.set_status(LifecycleStatus::Running);

        while !shutdown.is_shutdown() {
            let event = match tokio::time::timeout(self.receive_timeout, self.events.recv()).await
            {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(event)) => event,
            };
            self.handle_event(event).await;
        }

        self.handler.set_status(LifecycleStatus::Stopping);
        self.handler.stop_streaming().await;
        debug!("Control worker stopped");
        self.handler
    }

    async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ClientConnected(peer) => {
                let count = self.handler.client_connected();
                info!(%peer, clients = count, "Control client connected");
                let _ = self.clients.send(count);
            }
            ControlEvent::ClientDisconnected(peer) => {
                let count = self.handler.client_disconnected();
                info!(%peer, clients = count, "Control client disconnected");
                let _ = self.clients.send(count);
            }
            ControlEvent::Request { message, reply } => {
                let original_type = match &message {
                    Ok(message) => message.kind().tag(),
                    Err(_) => UNTAGGED,
                };
                let response = match AssertUnwindSafe(self.handler.dispatch(message))
                    .catch_unwind()
                    .await
                {
                    Ok(response) => response,
                    Err(_) => {
                        error!(request_type = original_type, "Control handler panicked");
                        Response::error(original_type, "internal error")
                    }
                };
                if reply.send(response).is_err() {
                    debug!("Client left before the response was ready");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::Calls;
    use crate::camera::{CameraResult, StillImage};
    use crate::camera::testing::ScriptedCamera;
    use crate::streaming::tests::publisher_from;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::{TempDir, tempdir};
    use tokio::sync::oneshot;
    use unlook_protocol::{ResponseStatus, decode_json};

    #[derive(Clone, Default)]
    struct CountingSink(Arc<Mutex<usize>>);

    impl CaptureSink for CountingSink {
        fn deliver(&mut self, images: Vec<StillImage>) -> CameraResult<()> {
            *self.0.lock().unwrap() += images.len();
            Ok(())
        }
    }

    struct Fixture {
        handler: ControlHandler,
        calls: Vec<Arc<Mutex<Calls>>>,
        sink: CountingSink,
        dir: TempDir,
    }

    fn fixture(sides: &[CameraSide]) -> Fixture {
        fixture_from(sides.iter().map(|&side| ScriptedCamera::new(side).0).collect())
    }

    fn fixture_from(cameras: Vec<ScriptedCamera>) -> Fixture {
        let dir = tempdir().unwrap();
        let store = DeviceStore::open(dir.path()).unwrap();
        let config = store.load_config();
        let count = cameras.len();
        let (publisher, calls) = publisher_from(cameras);
        let identity = DeviceIdentity::new("device-123456", count, false);
        let sink = CountingSink::default();
        let handler = ControlHandler::new(
            identity,
            config,
            publisher,
            store,
            Box::new(sink.clone()),
        );
        Fixture {
            handler,
            calls,
            sink,
            dir,
        }
    }

    #[tokio::test]
    async fn ping_echoes_server_time() {
        let mut fx = fixture(&CameraSide::ALL);
        let before = unix_timestamp();
        let response = fx.handler.handle(Message::ping(1.0)).await;
        assert!(response.is_ok());
        assert_eq!(response.original_type, "PING");
        assert!(response.get("timestamp").unwrap().as_f64().unwrap() >= before);
    }

    #[tokio::test]
    async fn status_reports_state() {
        let mut fx = fixture(&CameraSide::ALL);
        fx.handler.client_connected();
        let response = fx.handler.handle(Message::GetStatus).await;
        let state = response.get("state").unwrap();
        assert_eq!(state["status"], "idle");
        assert_eq!(state["cameras_connected"], 2);
        assert_eq!(state["clients_connected"], 1);
        assert_eq!(state["streaming"], false);
        assert!(state["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn start_stream_is_idempotent() {
        let mut fx = fixture(&CameraSide::ALL);

        let first = fx.handler.handle(Message::start_stream(StreamOptions::default())).await;
        assert!(first.is_ok());
        assert_eq!(first.get("streaming"), Some(&json!(true)));

        let second = fx.handler.handle(Message::start_stream(StreamOptions::default())).await;
        assert!(second.is_ok());
        assert_eq!(second.get("message"), Some(&json!("already streaming")));

        for calls in &fx.calls {
            assert_eq!(calls.lock().unwrap().started.len(), 1);
        }
        fx.handler.shutdown().await;
    }

    #[tokio::test]
    async fn start_failure_is_reported_not_streaming() {
        let cameras = CameraSide::ALL
            .into_iter()
            .map(|side| {
                let (mut camera, _) = ScriptedCamera::new(side);
                camera.fail_start = true;
                camera
            })
            .collect();
        let mut fx = fixture_from(cameras);

        let response = fx.handler.handle(Message::start_stream(StreamOptions::default())).await;
        assert!(!response.is_ok());
        assert_eq!(
            response.error_message(),
            Some("failed to start streaming on any camera")
        );

        let status = fx.handler.handle(Message::GetStatus).await;
        assert_eq!(status.get("state").unwrap()["streaming"], false);

        let capture = fx.handler.handle(Message::CaptureFrame).await;
        assert!(capture.is_ok());
        assert_eq!(*fx.sink.0.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn partial_start_names_only_working_cameras() {
        let (mut left, _) = ScriptedCamera::new(CameraSide::Left);
        left.fail_start = true;
        let mut fx = fixture_from(vec![left, ScriptedCamera::new(CameraSide::Right).0]);

        let response = fx.handler.handle(Message::start_stream(StreamOptions::default())).await;
        assert!(response.is_ok());
        assert_eq!(
            response.get("message"),
            Some(&json!("streaming h264 from right"))
        );
        assert!(fx.calls[0].lock().unwrap().started.is_empty());
        assert_eq!(fx.calls[1].lock().unwrap().started.len(), 1);
        fx.handler.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_is_acknowledged() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx.handler.handle(Message::Disconnect).await;
        assert!(response.is_ok());
        assert_eq!(response.original_type, "DISCONNECT");
        assert_eq!(response.get("disconnected"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn set_config_keeps_unknown_keys() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx
            .handler
            .handle(Message::set_config(json!({
                "camera": {"left": {"exposure": 100}},
                "server": {"command_port": 6000}
            })))
            .await;
        assert_eq!(response.get("config_updated"), Some(&json!(true)));

        let config = fx.handler.handle(Message::get_config()).await;
        let document = config.get("config").unwrap();
        assert_eq!(document["camera"]["left"]["exposure"], 100);
        assert_eq!(document["server"]["command_port"], 6000);

        let reloaded = DeviceStore::open(fx.dir.path()).unwrap().load_config();
        assert_eq!(reloaded.extra["server"]["command_port"], 6000);
    }

    #[tokio::test]
    async fn stop_when_idle_is_ok() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx.handler.handle(Message::stop_stream()).await;
        assert!(response.is_ok());
        assert_eq!(response.get("streaming"), Some(&json!(false)));
        assert_eq!(fx.calls[0].lock().unwrap().stopped, 0);
    }

    #[tokio::test]
    async fn start_overrides_apply_to_session_only() {
        let mut fx = fixture(&[CameraSide::Left]);
        let options = StreamOptions::default()
            .with_format(unlook_core::StreamFormat::Jpeg)
            .with_quality(80);
        assert!(fx.handler.handle(Message::start_stream(options)).await.is_ok());

        let started = fx.calls[0].lock().unwrap().started[0];
        assert_eq!(started.format, unlook_core::StreamFormat::Jpeg);
        assert_eq!(started.quality, 80);
        assert_eq!(fx.handler.config().stream, StreamConfig::default());

        fx.handler.handle(Message::stop_stream()).await;
        fx.handler.handle(Message::start_stream(StreamOptions::default())).await;
        let restarted = fx.calls[0].lock().unwrap().started[1];
        assert_eq!(restarted.format, unlook_core::StreamFormat::H264);
        fx.handler.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_command_names_the_tag() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx.handler.dispatch(decode_json(br#"{"type":"FOO"}"#)).await;
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.original_type, "FOO");
        assert_eq!(response.error_message(), Some(UNKNOWN_COMMAND));

        let response = fx.handler.handle(Message::discover("x")).await;
        assert_eq!(response.original_type, "UNLOOK_DISCOVER");
        assert_eq!(response.error_message(), Some(UNKNOWN_COMMAND));
    }

    #[tokio::test]
    async fn malformed_request_gets_error_response() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx.handler.dispatch(decode_json(b"{")).await;
        assert_eq!(response.original_type, UNTAGGED);
        assert!(response.error_message().unwrap().starts_with("malformed message"));

        let response = fx
            .handler
            .dispatch(decode_json(br#"{"type":"PING","timestamp":"soon"}"#))
            .await;
        assert_eq!(response.original_type, "PING");
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn set_config_merges_and_persists() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx
            .handler
            .handle(Message::set_config(json!({"camera": {"left": {"framerate": 15}}})))
            .await;
        assert!(response.is_ok());
        assert_eq!(response.get("config_updated"), Some(&json!(true)));
        assert_eq!(response.get("restarted"), Some(&json!([])));

        let config = fx.handler.config();
        assert_eq!(config.camera.left.framerate, 15);
        assert_eq!(config.camera.left.resolution.as_tuple(), (1280, 720));
        assert_eq!(config.camera.right, unlook_core::CameraConfig::default());

        let reloaded = DeviceStore::open(fx.dir.path()).unwrap().load_config();
        assert_eq!(&reloaded, config);

        let response = fx.handler.handle(Message::get_config()).await;
        assert_eq!(response.get("config").unwrap()["camera"]["left"]["framerate"], 15);
    }

    #[tokio::test]
    async fn set_config_without_document_fails() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx.handler.handle(Message::SetConfig { config: None }).await;
        assert_eq!(response.error_message(), Some("missing configuration"));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_untouched() {
        let mut fx = fixture(&CameraSide::ALL);
        for patch in [
            json!({"camera": {"left": {"resolution": [0, 720]}}}),
            json!({"camera": {"left": {"framerate": "fast"}}}),
            json!({"stream": {"format": "avi"}}),
        ] {
            let response = fx.handler.handle(Message::set_config(patch)).await;
            assert!(!response.is_ok());
        }
        assert_eq!(fx.handler.config(), &DeviceConfig::default());
    }

    #[tokio::test]
    async fn set_config_restarts_only_changed_cameras() {
        let mut fx = fixture(&CameraSide::ALL);
        fx.handler.handle(Message::start_stream(StreamOptions::default())).await;

        let response = fx
            .handler
            .handle(Message::set_config(json!({"camera": {"right": {"framerate": 10}}})))
            .await;
        assert_eq!(response.get("restarted"), Some(&json!(["right"])));
        assert_eq!(fx.calls[0].lock().unwrap().started.len(), 1);
        assert_eq!(fx.calls[1].lock().unwrap().started.len(), 2);
        assert_eq!(fx.calls[1].lock().unwrap().started[1].framerate, 10);

        let response = fx
            .handler
            .handle(Message::set_config(json!({"stream": {"bitrate": 1_000_000}})))
            .await;
        assert_eq!(response.get("restarted"), Some(&json!(["left", "right"])));
        fx.handler.shutdown().await;
    }

    #[tokio::test]
    async fn capture_delivers_stills() {
        let mut fx = fixture(&CameraSide::ALL);
        let response = fx.handler.handle(Message::CaptureFrame).await;
        assert!(response.is_ok());
        assert_eq!(response.get("captured"), Some(&json!(true)));
        assert_eq!(*fx.sink.0.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn capture_refused_while_streaming() {
        let mut fx = fixture(&CameraSide::ALL);
        fx.handler.handle(Message::start_stream(StreamOptions::default())).await;
        let response = fx.handler.handle(Message::CaptureFrame).await;
        assert!(!response.is_ok());
        assert_eq!(*fx.sink.0.lock().unwrap(), 0);
        fx.handler.shutdown().await;
    }

    #[tokio::test]
    async fn worker_serializes_and_counts_clients() {
        let fx = fixture(&CameraSide::ALL);
        let (tx, rx) = mpsc::channel(8);
        let (worker, clients) = ControlWorker::new(fx.handler, rx, Duration::from_millis(20));
        let shutdown = ShutdownHandle::new();
        let task = tokio::spawn(worker.run(shutdown.clone()));

        let peer = "127.0.0.1:40000".parse().unwrap();
        tx.send(ControlEvent::ClientConnected(peer)).await.unwrap();

        let (reply, response) = oneshot::channel();
        tx.send(ControlEvent::Request {
            message: Ok(Message::GetStatus),
            reply,
        })
        .await
        .unwrap();
        let response = response.await.unwrap();
        assert_eq!(response.get("state").unwrap()["clients_connected"], 1);
        assert_eq!(response.get("state").unwrap()["status"], "running");
        assert_eq!(*clients.borrow(), 1);

        tx.send(ControlEvent::ClientDisconnected(peer)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*clients.borrow(), 0);

        shutdown.trigger();
        let handler = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handler.state().status, LifecycleStatus::Stopping);
    }
}
