//! Scanner daemon: discovery, control channel, frame streaming.
//!
//! This crate provides the UnLook device server that handles:
//! - UDP discovery requests and periodic announce beacons
//! - A strictly serialized TCP control channel
//! - Per-camera frame producers fanned out to stream subscribers
//! - The persisted device id and configuration document
//!
//! # Example
//!
//! ```rust,no_run
//! use unlook_server::{DeviceServer, LogSink, ServerConfig, SignalHandler, SyntheticBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!
//!     let mut backend = SyntheticBackend::default();
//!     let server =
//!         DeviceServer::bind(ServerConfig::default(), &mut backend, Box::new(LogSink)).await?;
//!     server.run(signals.shutdown_handle()).await?;
//!     Ok(())
//! }
//! ```

mod camera;
mod config;
mod discovery;
mod error;
mod handler;
mod server;
mod signals;
mod socket;
mod store;
mod streaming;
mod synthetic;

pub use camera::{
    Camera, CameraBackend, CameraError, CameraHandle, CameraResult, CaptureSink, LogSink,
    StillImage, StreamSettings, open_cameras,
};
pub use config::{
    DEFAULT_BEACON_PORT, DEFAULT_COMMAND_PORT, DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_GROUP,
    DEFAULT_STREAM_PORT, ServerConfig, default_state_dir,
};
pub use discovery::{Beacon, DiscoveryResponder, ResponderState, bind_discovery_socket};
pub use error::{ServerError, ServerResult};
pub use handler::{ControlHandler, ControlWorker};
pub use server::{BoundAddrs, DeviceServer};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket::{Connection, ControlEvent, ControlListener};
pub use store::DeviceStore;
pub use streaming::{PublisherOptions, StreamServer, StreamingPublisher};
pub use synthetic::{SyntheticBackend, SyntheticCamera};
