//! Stream fan-out server.
//!
//! Every TCP subscriber gets its own broadcast receiver. A subscriber that
//! falls more than the channel capacity behind loses the oldest frames and
//! keeps going; producers never wait for subscribers.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use unlook_protocol::{FrameLimits, FrameWriter};

use crate::error::{ServerError, ServerResult};
use crate::signals::ShutdownHandle;

/// Accepts stream subscribers and forwards published frames to them.
pub struct StreamServer {
    listener: TcpListener,
    frames: broadcast::Sender<Bytes>,
    write_timeout: Duration,
}

impl StreamServer {
    /// Binds the stream port.
    pub async fn bind(
        addr: SocketAddr,
        frames: broadcast::Sender<Bytes>,
        write_timeout: Duration,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind("stream", addr, e))?;
        info!(addr = %listener.local_addr()?, "Stream server listening");
        Ok(Self {
            listener,
            frames,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts subscribers until shutdown.
    pub async fn run(self, shutdown: ShutdownHandle) {
        let stop = shutdown.wait().wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let rx = self.frames.subscribe();
                        info!(%peer, subscribers = self.frames.receiver_count(), "Stream subscriber connected");
                        tokio::spawn(serve_subscriber(
                            stream,
                            peer,
                            rx,
                            shutdown.clone(),
                            self.write_timeout,
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept stream subscriber"),
                },
            }
        }
        debug!("Stream server stopped");
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut frames: broadcast::Receiver<Bytes>,
    shutdown: ShutdownHandle,
    write_timeout: Duration,
) {
    let _ = stream.set_nodelay(true);
    let mut writer = FrameWriter::new(stream, FrameLimits::STREAM);
    let stop = shutdown.wait().wait();
    tokio::pin!(stop);

    let mut sent: u64 = 0;
    let mut dropped: u64 = 0;
    loop {
        let wire = tokio::select! {
            _ = &mut stop => break,
            received = frames.recv() => match received {
                Ok(wire) => wire,
                Err(RecvError::Lagged(skipped)) => {
                    dropped += skipped;
                    warn!(%peer, skipped, "Slow stream subscriber, frames dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        match tokio::time::timeout(write_timeout, writer.write_encoded(&wire)).await {
            Ok(Ok(())) => sent += 1,
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "Stream subscriber write failed");
                break;
            }
            Err(_) => {
                warn!(%peer, timeout = ?write_timeout, "Stream subscriber stalled, disconnecting");
                break;
            }
        }
    }
    info!(%peer, sent, dropped, "Stream subscriber disconnected");
}
