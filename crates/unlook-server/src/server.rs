//! Daemon assembly.
//!
//! [`DeviceServer::bind`] opens the store and the cameras and binds all three
//! channels, so every startup failure surfaces before anything runs.
//! [`DeviceServer::run`] drives the workers until shutdown, then stops
//! streaming, closes the sockets and releases the cameras, in that order.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use unlook_core::DeviceIdentity;
use unlook_protocol::Announce;

use crate::camera::{CameraBackend, CaptureSink, open_cameras};
use crate::config::ServerConfig;
use crate::discovery::{Beacon, DiscoveryResponder, bind_discovery_socket};
use crate::error::{ServerError, ServerResult};
use crate::handler::{ControlHandler, ControlWorker};
use crate::signals::ShutdownHandle;
use crate::socket::ControlListener;
use crate::store::DeviceStore;
use crate::streaming::{PublisherOptions, StreamServer, StreamingPublisher};

/// Addresses the server actually bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub discovery: SocketAddr,
    pub control: SocketAddr,
    pub stream: SocketAddr,
}

/// A fully bound scanner daemon.
pub struct DeviceServer {
    config: ServerConfig,
    identity: DeviceIdentity,
    addrs: BoundAddrs,
    discovery: Arc<UdpSocket>,
    control: ControlListener,
    stream: StreamServer,
    worker: ControlWorker,
    clients: watch::Receiver<usize>,
}

impl DeviceServer {
    /// Prepares the daemon: persisted state, cameras, sockets.
    ///
    /// A camera that fails to open is left out. Failing to bind any channel
    /// is fatal.
    pub async fn bind(
        config: ServerConfig,
        backend: &mut dyn CameraBackend,
        sink: Box<dyn CaptureSink>,
    ) -> ServerResult<Self> {
        let store = DeviceStore::open(&config.state_dir)?;
        let device_id = store.device_id();
        let device_config = store.load_config();

        let cameras = open_cameras(backend);
        if cameras.is_empty() {
            warn!("No cameras available, only discovery and status will be useful");
        }
        let identity = DeviceIdentity::new(device_id, cameras.len(), config.projector);
        info!(
            device_id = %identity.device_id,
            name = %identity.name,
            cameras = identity.cameras,
            "Device identity"
        );

        let (frames, _) = broadcast::channel(config.stream_buffer.max(1));
        let publisher = StreamingPublisher::new(
            cameras,
            frames.clone(),
            PublisherOptions {
                chunk_timeout: config.chunk_timeout,
                stop_timeout: config.producer_stop_timeout,
                ..PublisherOptions::default()
            },
        );

        let discovery = bind_discovery_socket(config.discovery_addr(), config.multicast_group)?;
        let (events_tx, events_rx) = mpsc::channel(config.max_connections.max(1) * 2);
        let control = ControlListener::bind(&config, events_tx).await?;
        let stream = StreamServer::bind(config.stream_addr(), frames, config.write_timeout).await?;

        let addrs = BoundAddrs {
            discovery: discovery.local_addr()?,
            control: control.local_addr()?,
            stream: stream.local_addr()?,
        };

        let handler = ControlHandler::new(
            identity.clone(),
            device_config,
            publisher,
            store,
            sink,
        )
        .with_capture_timeout(config.capture_timeout);
        let (worker, clients) = ControlWorker::new(handler, events_rx, config.receive_timeout);

        Ok(Self {
            config,
            identity,
            addrs,
            discovery,
            control,
            stream,
            worker,
            clients,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn local_addrs(&self) -> BoundAddrs {
        self.addrs
    }

    /// Runs until `shutdown` is triggered.
    pub async fn run(self, shutdown: ShutdownHandle) -> ServerResult<()> {
        let announce = Announce::from_identity(&self.identity, self.addrs.control.port());
        let sockets = ShutdownHandle::new();
        let mut tasks = Vec::new();

        let responder = DiscoveryResponder::new(
            self.discovery.clone(),
            announce.clone(),
            self.config.receive_timeout,
        );
        let responder_shutdown = sockets.clone();
        tasks.push(tokio::spawn(async move {
            responder.run(responder_shutdown).await;
        }));

        if let Some(interval) = self.config.beacon_interval {
            let beacon = Beacon::new(
                self.discovery.clone(),
                announce,
                &[self.addrs.discovery.port(), self.config.beacon_port],
                interval,
                self.clients.clone(),
            );
            tasks.push(tokio::spawn(beacon.run(sockets.clone())));
        }

        tasks.push(tokio::spawn(self.control.run(sockets.clone())));
        tasks.push(tokio::spawn(self.stream.run(sockets.clone())));

        info!(
            discovery = %self.addrs.discovery,
            control = %self.addrs.control,
            stream = %self.addrs.stream,
            "Scanner ready"
        );

        let handler = tokio::spawn(self.worker.run(shutdown))
            .await
            .map_err(|_| ServerError::WorkerGone);

        info!("Shutting down");
        sockets.trigger();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        debug!("Sockets closed");

        let handler = handler?;
        handler.shutdown().await;
        info!("Scanner stopped");
        Ok(())
    }
}
