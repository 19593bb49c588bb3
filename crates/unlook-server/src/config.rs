//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Well-known discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5678;
/// Auxiliary port that also receives beacons.
pub const DEFAULT_BEACON_PORT: u16 = 5679;
/// Control channel port.
pub const DEFAULT_COMMAND_PORT: u16 = 5680;
/// Frame stream port.
pub const DEFAULT_STREAM_PORT: u16 = 5681;
/// Multicast group joined by the discovery socket.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address all sockets bind to.
    pub bind_address: IpAddr,

    /// UDP port for discovery requests.
    pub discovery_port: u16,

    /// Second UDP port targeted by beacons.
    pub beacon_port: u16,

    /// TCP port of the control channel.
    pub command_port: u16,

    /// TCP port of the frame stream.
    pub stream_port: u16,

    /// Multicast group to join for discovery, if any.
    pub multicast_group: Option<Ipv4Addr>,

    /// Period of announce beacons. `None` disables them.
    pub beacon_interval: Option<Duration>,

    /// Bounded wait of worker receive loops between shutdown checks.
    pub receive_timeout: Duration,

    /// Control connections silent for this long are closed.
    pub client_idle_timeout: Duration,

    /// Timeout for writing a response or a frame to a peer.
    pub write_timeout: Duration,

    /// How long StopStream waits for each producer to exit.
    pub producer_stop_timeout: Duration,

    /// Bounded wait for one chunk from a streaming camera.
    pub chunk_timeout: Duration,

    /// Bounded wait for one still capture.
    pub capture_timeout: Duration,

    /// Frames buffered per stream subscriber before the oldest are dropped.
    pub stream_buffer: usize,

    /// Maximum concurrent control connections.
    pub max_connections: usize,

    /// Directory holding the device id and the configuration document.
    pub state_dir: PathBuf,

    /// Whether a structured-light projector is attached.
    pub projector: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            beacon_port: DEFAULT_BEACON_PORT,
            command_port: DEFAULT_COMMAND_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            multicast_group: Some(DEFAULT_MULTICAST_GROUP),
            beacon_interval: Some(Duration::from_secs(1)),
            receive_timeout: Duration::from_secs(1),
            client_idle_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(5),
            producer_stop_timeout: Duration::from_secs(2),
            chunk_timeout: Duration::from_secs(1),
            capture_timeout: Duration::from_secs(5),
            stream_buffer: 64,
            max_connections: 16,
            state_dir: default_state_dir(),
            projector: false,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration storing its state in `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    /// Configuration for tests: loopback, ephemeral ports, no beacon, short
    /// timeouts.
    pub fn ephemeral(state_dir: impl Into<PathBuf>) -> Self {
        Self::new(state_dir)
            .with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_ports(0, 0, 0)
            .with_multicast_group(None)
            .with_beacon_interval(None)
            .with_receive_timeout(Duration::from_millis(50))
            .with_chunk_timeout(Duration::from_millis(100))
    }

    /// Builder: set bind address.
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Builder: set discovery, command and stream ports.
    pub fn with_ports(mut self, discovery: u16, command: u16, stream: u16) -> Self {
        self.discovery_port = discovery;
        self.command_port = command;
        self.stream_port = stream;
        self
    }

    /// Builder: set the auxiliary beacon port.
    pub fn with_beacon_port(mut self, port: u16) -> Self {
        self.beacon_port = port;
        self
    }

    /// Builder: set multicast group.
    pub fn with_multicast_group(mut self, group: Option<Ipv4Addr>) -> Self {
        self.multicast_group = group;
        self
    }

    /// Builder: set beacon interval.
    pub fn with_beacon_interval(mut self, interval: Option<Duration>) -> Self {
        self.beacon_interval = interval;
        self
    }

    /// Builder: set receive timeout.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Builder: set client idle timeout.
    pub fn with_client_idle_timeout(mut self, timeout: Duration) -> Self {
        self.client_idle_timeout = timeout;
        self
    }

    /// Builder: set producer stop timeout.
    pub fn with_producer_stop_timeout(mut self, timeout: Duration) -> Self {
        self.producer_stop_timeout = timeout;
        self
    }

    /// Builder: set chunk timeout.
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Builder: set stream buffer size.
    pub fn with_stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames.max(1);
        self
    }

    /// Builder: set projector flag.
    pub fn with_projector(mut self, projector: bool) -> Self {
        self.projector = projector;
        self
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.discovery_port)
    }

    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.command_port)
    }

    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.stream_port)
    }
}

/// Returns the default state directory.
///
/// Uses the platform data directory (`$XDG_DATA_HOME/unlook` on Linux),
/// falling back to `.unlook` in the working directory.
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("unlook"))
        .unwrap_or_else(|| PathBuf::from(".unlook"))
}
