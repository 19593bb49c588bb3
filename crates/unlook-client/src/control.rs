//! Control channel client.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use unlook_protocol::{
    FrameLimits, FrameReader, FrameWriter, Message, Response, StreamOptions, decode, encode,
};

use crate::error::{ClientError, ClientResult};

/// Client for the scanner's control channel.
///
/// Requests are answered strictly in order; each call waits for its
/// response before returning.
pub struct ControlClient {
    addr: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    timeout: Duration,
}

impl ControlClient {
    /// Connects to the control channel.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> ClientResult<Self> {
        debug!(%addr, "connecting to scanner");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection to {} timed out after {}s",
                    addr,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| ClientError::Connection(format!("failed to connect to {}: {}", addr, e)))?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            addr,
            reader: FrameReader::new(read_half, FrameLimits::CONTROL),
            writer: FrameWriter::new(write_half, FrameLimits::CONTROL),
            timeout,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends a request and waits for its response, whatever its status.
    pub async fn call(&mut self, message: &Message) -> ClientResult<Response> {
        let parts = encode(message)?;
        tokio::time::timeout(self.timeout, self.writer.write_message(&parts))
            .await
            .map_err(|_| ClientError::Timeout("sending request".into()))??;

        let parts = tokio::time::timeout(self.timeout, self.reader.read_message())
            .await
            .map_err(|_| ClientError::Timeout("reading response".into()))??
            .ok_or_else(|| ClientError::Connection("scanner closed the connection".into()))?;

        match decode(&parts)? {
            Message::Response(response) => {
                debug!(
                    original_type = %response.original_type,
                    status = ?response.status,
                    "response received"
                );
                Ok(response)
            }
            other => Err(ClientError::Protocol(format!(
                "expected a response, got {}",
                other.kind()
            ))),
        }
    }

    /// Sends a request and turns an error response into [`ClientError::Rejected`].
    pub async fn request(&mut self, message: &Message) -> ClientResult<Response> {
        let response = self.call(message).await?;
        if response.is_ok() {
            Ok(response)
        } else {
            Err(ClientError::Rejected {
                request: response.original_type.clone(),
                reason: response
                    .error_message()
                    .unwrap_or("no reason given")
                    .to_string(),
            })
        }
    }

    pub async fn ping(&mut self, timestamp: f64) -> ClientResult<Response> {
        self.request(&Message::ping(timestamp)).await
    }

    pub async fn status(&mut self) -> ClientResult<Response> {
        self.request(&Message::GetStatus).await
    }

    pub async fn start_stream(&mut self, options: StreamOptions) -> ClientResult<Response> {
        self.request(&Message::start_stream(options)).await
    }

    pub async fn stop_stream(&mut self) -> ClientResult<Response> {
        self.request(&Message::stop_stream()).await
    }

    pub async fn capture(&mut self) -> ClientResult<Response> {
        self.request(&Message::CaptureFrame).await
    }

    pub async fn get_config(&mut self) -> ClientResult<serde_json::Value> {
        let response = self.request(&Message::get_config()).await?;
        response
            .get("config")
            .cloned()
            .ok_or_else(|| ClientError::Protocol("response carries no config".into()))
    }

    pub async fn set_config(&mut self, patch: serde_json::Value) -> ClientResult<Response> {
        self.request(&Message::set_config(patch)).await
    }

    /// Tells the scanner this client is done and closes the connection.
    pub async fn disconnect(mut self) -> ClientResult<()> {
        self.request(&Message::Disconnect).await?;
        Ok(())
    }
}
