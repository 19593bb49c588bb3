//! TCP listener for the control channel.
//!
//! Every accepted connection gets its own task which reads one request,
//! forwards it to the control worker and waits for the reply before reading
//! the next. The worker handles one request at a time, so commands from all
//! clients are processed in a single total order. A `DISCONNECT` request is
//! answered and then the connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, info, warn};

use unlook_protocol::{
    FrameLimits, FrameReader, FrameWriter, Message, ProtocolError, ProtocolResult, Response,
    decode, encode,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::signals::ShutdownHandle;

/// Events sent by connection tasks to the control worker.
#[derive(Debug)]
pub enum ControlEvent {
    /// A client connected.
    ClientConnected(SocketAddr),
    /// A decoded request, or the decode failure, awaiting a reply.
    Request {
        message: ProtocolResult<Message>,
        reply: oneshot::Sender<Response>,
    },
    /// A client went away or was closed for inactivity.
    ClientDisconnected(SocketAddr),
}

/// Accepts control connections.
pub struct ControlListener {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    idle_timeout: Duration,
    write_timeout: Duration,
    events: mpsc::Sender<ControlEvent>,
}

impl ControlListener {
    /// Binds the control port.
    pub async fn bind(
        config: &ServerConfig,
        events: mpsc::Sender<ControlEvent>,
    ) -> ServerResult<Self> {
        let addr = config.command_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind("control", addr, e))?;
        info!(addr = %listener.local_addr()?, "Control channel listening");

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections.max(1))),
            idle_timeout: config.client_idle_timeout,
            write_timeout: config.write_timeout,
            events,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts a single connection, waiting for a free slot first.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, peer) = self.listener.accept().await?;
        debug!(%peer, "Accepted control connection");
        Ok(Connection::new(
            stream,
            peer,
            self.idle_timeout,
            self.write_timeout,
            permit,
        ))
    }

    /// Accepts connections until shutdown.
    pub async fn run(self, shutdown: ShutdownHandle) {
        let stop = shutdown.wait().wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = self.accept() => match accepted {
                    Ok(connection) => {
                        tokio::spawn(serve_connection(
                            connection,
                            self.events.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept control connection"),
                },
            }
        }
        self.semaphore.close();
        debug!("Control listener stopped");
    }
}

/// Reads requests from one client and relays them to the worker.
async fn serve_connection(
    mut connection: Connection,
    events: mpsc::Sender<ControlEvent>,
    shutdown: ShutdownHandle,
) {
    let peer = connection.peer();
    if events.send(ControlEvent::ClientConnected(peer)).await.is_err() {
        return;
    }

    let stop = shutdown.wait().wait();
    tokio::pin!(stop);

    loop {
        let request = tokio::select! {
            _ = &mut stop => break,
            request = connection.read_request() => request,
        };

        let message = match request {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(%peer, "Control client disconnected");
                break;
            }
            Err(e) if e.is_disconnect() => {
                info!(%peer, error = %e, "Closing control connection");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "Control connection failed");
                break;
            }
        };

        let closing = matches!(message, Ok(Message::Disconnect));
        let (reply_tx, reply_rx) = oneshot::channel();
        let event = ControlEvent::Request {
            message,
            reply: reply_tx,
        };
        if events.send(event).await.is_err() {
            break;
        }
        let Ok(response) = reply_rx.await else {
            break;
        };
        if let Err(e) = connection.write_response(&response).await {
            warn!(%peer, error = %e, "Failed to send response");
            break;
        }
        if closing {
            info!(%peer, "Control client disconnected on request");
            break;
        }
    }

    let _ = events.send(ControlEvent::ClientDisconnected(peer)).await;
}

/// A client connection on the control channel.
pub struct Connection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    idle_timeout: Duration,
    write_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        idle_timeout: Duration,
        write_timeout: Duration,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader::new(read_half, FrameLimits::CONTROL),
            writer: FrameWriter::new(write_half, FrameLimits::CONTROL),
            peer,
            idle_timeout,
            write_timeout,
            _permit: permit,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the next request.
    ///
    /// Returns `Ok(None)` on a clean close. A request that arrives intact but
    /// does not decode is returned as `Ok(Some(Err(_)))` so it can be
    /// answered; framing errors leave the stream unusable and are returned as
    /// `Err`.
    pub async fn read_request(&mut self) -> ServerResult<Option<ProtocolResult<Message>>> {
        let parts = match tokio::time::timeout(self.idle_timeout, self.reader.read_message()).await
        {
            Ok(Ok(Some(parts))) => parts,
            Ok(Ok(None)) => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ProtocolError::timeout("waiting for request").into()),
        };
        Ok(Some(decode(&parts)))
    }

    /// Writes one response.
    pub async fn write_response(&mut self, response: &Response) -> ServerResult<()> {
        let parts = encode(&Message::Response(response.clone()))?;
        match tokio::time::timeout(self.write_timeout, self.writer.write_message(&parts)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::timeout("writing response").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;
    use unlook_protocol::encode_parts;

    struct Client {
        reader: FrameReader<OwnedReadHalf>,
        writer: FrameWriter<OwnedWriteHalf>,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let (read_half, write_half) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                reader: FrameReader::new(read_half, FrameLimits::CONTROL),
                writer: FrameWriter::new(write_half, FrameLimits::CONTROL),
            }
        }

        async fn send_raw(&mut self, json: &'static str) {
            self.writer
                .write_message(&[Bytes::from_static(json.as_bytes())])
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Option<Message> {
            let parts = self.reader.read_message().await.unwrap()?;
            Some(decode(&parts).unwrap())
        }
    }

    /// Answers every request with an ok response naming the request kind.
    async fn echo_worker(mut events: mpsc::Receiver<ControlEvent>) -> Vec<String> {
        let mut log = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                ControlEvent::ClientConnected(_) => log.push("connected".to_string()),
                ControlEvent::ClientDisconnected(_) => log.push("disconnected".to_string()),
                ControlEvent::Request { message, reply } => {
                    let response = match message {
                        Ok(message) => Response::ok(message.kind().tag()),
                        Err(e) => Response::error("UNKNOWN", e.to_string()),
                    };
                    log.push(response.original_type.clone());
                    let _ = reply.send(response);
                }
            }
        }
        log
    }

    async fn listener(config: &ServerConfig) -> (ControlListener, mpsc::Receiver<ControlEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ControlListener::bind(config, tx).await.unwrap(), rx)
    }

    #[tokio::test]
    async fn requests_are_answered_in_order() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::ephemeral(dir.path());
        let (listener, events) = listener(&config).await;
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownHandle::new();
        tokio::spawn(listener.run(shutdown.clone()));
        let worker = tokio::spawn(echo_worker(events));

        let mut client = Client::connect(addr).await;
        client.send_raw(r#"{"type":"PING","timestamp":1.0}"#).await;
        client.send_raw(r#"{"type":"GET_STATUS"}"#).await;
        client.send_raw("not json").await;

        let mut answered = Vec::new();
        for _ in 0..3 {
            match client.recv().await {
                Some(Message::Response(response)) => answered.push(response.original_type),
                other => panic!("expected a response, got {other:?}"),
            }
        }
        assert_eq!(answered, ["PING", "GET_STATUS", "UNKNOWN"]);

        drop(client);
        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.abort();
    }

    #[tokio::test]
    async fn disconnect_is_answered_then_closed() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::ephemeral(dir.path());
        let (listener, events) = listener(&config).await;
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownHandle::new();
        tokio::spawn(listener.run(shutdown.clone()));
        let worker = tokio::spawn(echo_worker(events));

        let mut client = Client::connect(addr).await;
        client.send_raw(r#"{"type":"DISCONNECT"}"#).await;
        match client.recv().await {
            Some(Message::Response(response)) => assert_eq!(response.original_type, "DISCONNECT"),
            other => panic!("expected a response, got {other:?}"),
        }
        let closed = tokio::time::timeout(Duration::from_secs(2), client.recv()).await;
        assert!(matches!(closed, Ok(None)));

        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.abort();
    }

    #[tokio::test]
    async fn idle_connection_is_closed() {
        let dir = tempdir().unwrap();
        let mut config = ServerConfig::ephemeral(dir.path());
        config.client_idle_timeout = Duration::from_millis(50);
        let (listener, mut events) = listener(&config).await;
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownHandle::new();
        tokio::spawn(listener.run(shutdown.clone()));

        let mut client = Client::connect(addr).await;
        assert!(matches!(
            events.recv().await,
            Some(ControlEvent::ClientConnected(_))
        ));
        assert!(matches!(
            tokio::time::timeout(Duration::from_secs(2), events.recv()).await,
            Ok(Some(ControlEvent::ClientDisconnected(_)))
        ));
        assert!(client.recv().await.is_none());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn oversized_request_closes_connection() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::ephemeral(dir.path());
        let (listener, events) = listener(&config).await;
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownHandle::new();
        tokio::spawn(listener.run(shutdown.clone()));
        tokio::spawn(echo_worker(events));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let huge = Bytes::from(vec![b' '; FrameLimits::CONTROL.max_part_size + 1]);
        let encoded = encode_parts(&[huge], FrameLimits::STREAM).unwrap();
        let mut writer = FrameWriter::new(write_half, FrameLimits::STREAM);
        let _ = writer.write_encoded(&encoded).await;

        let mut reader = FrameReader::new(read_half, FrameLimits::CONTROL);
        let closed = tokio::time::timeout(Duration::from_secs(2), reader.read_message()).await;
        assert!(matches!(closed, Ok(Ok(None)) | Ok(Err(_))));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::ephemeral(dir.path());
        let (first, _events) = listener(&config).await;
        let taken = first.local_addr().unwrap();

        let config = config.with_ports(0, taken.port(), 0);
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            ControlListener::bind(&config, tx).await,
            Err(ServerError::Bind {
                channel: "control",
                ..
            })
        ));
    }
}
