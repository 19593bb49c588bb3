//! Discovery responder and announce beacon.
//!
//! The responder listens on the discovery port for `UNLOOK_DISCOVER`
//! datagrams and answers each one with a unicast `UNLOOK_ANNOUNCE`. Anything
//! else arriving on the port is network noise and is dropped without a reply.
//!
//! The beacon shares the socket and periodically broadcasts the announcement
//! while no control client is connected, so idle scanners stay visible.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use unlook_protocol::{Announce, MAX_DATAGRAM_SIZE, Message, decode_json, encode_json};

use crate::error::{ServerError, ServerResult};
use crate::signals::ShutdownHandle;

/// Lifecycle of the responder loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    /// Bound, loop not started.
    Idle,
    /// Waiting for datagrams.
    Listening,
    /// Just answered a Discover.
    RespondedOnce,
    /// Shut down.
    Stopped,
}

/// Binds the discovery socket with broadcast enabled.
///
/// Joining the multicast group is best-effort: failure is logged and the
/// responder still answers broadcast and unicast requests.
pub fn bind_discovery_socket(
    addr: SocketAddr,
    multicast_group: Option<Ipv4Addr>,
) -> ServerResult<Arc<UdpSocket>> {
    let bind_err = |e| ServerError::bind("discovery", addr, e);
    let socket = StdUdpSocket::bind(addr).map_err(bind_err)?;
    socket.set_broadcast(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    if let Some(group) = multicast_group {
        let interface = match addr.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        match socket.join_multicast_v4(&group, &interface) {
            Ok(()) => debug!(%group, "Joined discovery multicast group"),
            Err(e) => warn!(%group, error = %e, "Failed to join multicast group, broadcast only"),
        }
    }

    let socket = UdpSocket::from_std(socket).map_err(bind_err)?;
    info!(addr = %socket.local_addr()?, "Discovery responder listening");
    Ok(Arc::new(socket))
}

/// Answers Discover datagrams.
pub struct DiscoveryResponder {
    socket: Arc<UdpSocket>,
    announce: Announce,
    receive_timeout: Duration,
    state: ResponderState,
}

impl DiscoveryResponder {
    pub fn new(socket: Arc<UdpSocket>, announce: Announce, receive_timeout: Duration) -> Self {
        Self {
            socket,
            announce,
            receive_timeout,
            state: ResponderState::Idle,
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// Builds the reply for one datagram, or `None` if it is to be ignored.
    pub fn handle_datagram(&mut self, data: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        match decode_json(data) {
            Ok(Message::Discover { client_version }) => {
                debug!(%peer, %client_version, "Discovery request");
                match encode_json(&Message::Announce(self.announce.clone())) {
                    Ok(reply) => {
                        self.state = ResponderState::RespondedOnce;
                        Some(reply)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to encode announcement");
                        None
                    }
                }
            }
            Ok(other) => {
                trace!(%peer, kind = %other.kind(), "Ignoring non-discovery datagram");
                None
            }
            Err(e) => {
                trace!(%peer, error = %e, "Ignoring undecodable datagram");
                None
            }
        }
    }

    /// Serves requests until shutdown.
    ///
    /// Each receive waits at most `receive_timeout`, so shutdown is noticed
    /// within that bound even on a silent network.
    pub async fn run(mut self, shutdown: ShutdownHandle) -> ResponderState {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        self.state = ResponderState::Listening;

        while !shutdown.is_shutdown() {
            let received =
                tokio::time::timeout(self.receive_timeout, self.socket.recv_from(&mut buffer)).await;
            let (len, peer) = match received {
                Err(_) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!(error = %e, "Discovery receive failed");
                    continue;
                }
            };

            if let Some(reply) = self.handle_datagram(&buffer[..len], peer) {
                match self.socket.send_to(&reply, peer).await {
                    Ok(_) => info!(%peer, "Announced to client"),
                    Err(e) => warn!(%peer, error = %e, "Failed to send announcement"),
                }
            }
            self.state = ResponderState::Listening;
        }

        self.state = ResponderState::Stopped;
        debug!("Discovery responder stopped");
        self.state
    }
}

/// Periodically broadcasts the announcement while no client is connected.
pub struct Beacon {
    socket: Arc<UdpSocket>,
    announce: Announce,
    targets: Vec<SocketAddr>,
    interval: Duration,
    clients: watch::Receiver<usize>,
}

impl Beacon {
    /// Creates a beacon broadcasting to `255.255.255.255` on each port.
    pub fn new(
        socket: Arc<UdpSocket>,
        announce: Announce,
        ports: &[u16],
        interval: Duration,
        clients: watch::Receiver<usize>,
    ) -> Self {
        let announce = match local_ip() {
            Some(ip) => announce.with_ip_address(ip.to_string()),
            None => announce,
        };
        Self {
            socket,
            announce,
            targets: ports
                .iter()
                .map(|port| SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), *port))
                .collect(),
            interval,
            clients,
        }
    }

    /// Replaces the broadcast targets.
    #[must_use]
    pub fn with_targets(mut self, targets: Vec<SocketAddr>) -> Self {
        self.targets = targets;
        self
    }

    /// Broadcasts until shutdown.
    pub async fn run(self, shutdown: ShutdownHandle) {
        let payload = match encode_json(&Message::Announce(self.announce.clone())) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode beacon, beacon disabled");
                return;
            }
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let stop = shutdown.wait().wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }
            if *self.clients.borrow() > 0 {
                continue;
            }
            for target in &self.targets {
                if let Err(e) = self.socket.send_to(&payload, target).await {
                    debug!(%target, error = %e, "Beacon send failed");
                }
            }
        }
        debug!("Beacon stopped");
    }
}

/// Best guess at the address other hosts reach us on.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn local_ip() -> Option<IpAddr> {
    let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
