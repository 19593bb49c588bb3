//! Finding scanners on the local network.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace};

use unlook_protocol::{Announce, MAX_DATAGRAM_SIZE, Message, decode_json, encode_json};
use unlook_server::DEFAULT_MULTICAST_GROUP;

use crate::error::ClientResult;

/// A scanner that answered discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundDevice {
    pub announce: Announce,
    /// Address the announcement came from.
    pub source: SocketAddr,
}

impl FoundDevice {
    /// Address of the device's control channel.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host(), self.announce.port)
    }

    /// Host to connect to, preferring the announced address.
    pub fn host(&self) -> IpAddr {
        self.announce
            .ip_address
            .as_deref()
            .and_then(|ip| ip.parse().ok())
            .unwrap_or_else(|| self.source.ip())
    }
}

/// Broadcasts a discovery request on `port` and collects answers for `wait`.
pub async fn discover(port: u16, wait: Duration) -> ClientResult<Vec<FoundDevice>> {
    let targets = [
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port),
        SocketAddr::new(IpAddr::V4(DEFAULT_MULTICAST_GROUP), port),
    ];
    discover_at(&targets, wait, false).await
}

/// Sends a discovery request to each target and collects distinct answers.
///
/// With `first_only` set, returns as soon as one device answers.
pub async fn discover_at(
    targets: &[SocketAddr],
    wait: Duration,
    first_only: bool,
) -> ClientResult<Vec<FoundDevice>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let request = encode_json(&Message::discover(env!("CARGO_PKG_VERSION")))?;
    for target in targets {
        if let Err(e) = socket.send_to(&request, target).await {
            debug!(%target, error = %e, "discovery send failed");
        }
    }

    let deadline = Instant::now() + wait;
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await;
        let (len, source) = match received {
            Err(_) => break,
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                debug!(error = %e, "discovery receive failed");
                continue;
            }
        };

        match decode_json(&buffer[..len]) {
            Ok(Message::Announce(announce)) => {
                if seen.insert(announce.device_id.clone()) {
                    debug!(device_id = %announce.device_id, %source, "scanner found");
                    found.push(FoundDevice { announce, source });
                    if first_only {
                        break;
                    }
                }
            }
            Ok(other) => trace!(kind = %other.kind(), %source, "ignoring datagram"),
            Err(e) => trace!(error = %e, %source, "ignoring undecodable datagram"),
        }
    }
    Ok(found)
}
