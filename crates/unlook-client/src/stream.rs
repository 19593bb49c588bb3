//! Frame stream subscriber.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use unlook_protocol::{Frame, FrameLimits, FrameReader, Message, decode};

use crate::error::{ClientError, ClientResult};

/// Receives frames published by the scanner.
pub struct StreamSubscriber {
    reader: FrameReader<TcpStream>,
}

impl StreamSubscriber {
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> ClientResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Connection(format!("connection to {} timed out", addr)))?
            .map_err(|e| ClientError::Connection(format!("failed to connect to {}: {}", addr, e)))?;
        debug!(%addr, "subscribed to frame stream");
        Ok(Self {
            reader: FrameReader::new(stream, FrameLimits::STREAM),
        })
    }

    /// Waits for the next frame. Returns `None` when the scanner closes the
    /// stream.
    pub async fn next_frame(&mut self) -> ClientResult<Option<Frame>> {
        let Some(parts) = self.reader.read_message().await? else {
            return Ok(None);
        };
        match decode(&parts)? {
            Message::Frame(frame) => Ok(Some(frame)),
            other => Err(ClientError::Protocol(format!(
                "expected a frame, got {}",
                other.kind()
            ))),
        }
    }
}
