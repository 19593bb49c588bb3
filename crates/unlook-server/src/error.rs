//! Server error types.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::camera::CameraError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error on an already established socket or file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] unlook_protocol::ProtocolError),

    /// A listening socket could not be bound. Fatal at startup.
    #[error("failed to bind {channel} socket on {addr}: {source}")]
    Bind {
        channel: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Camera failure.
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    /// Invalid device configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] unlook_core::ConfigError),

    /// Reading or writing persisted state failed.
    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The control worker is gone.
    #[error("control worker is not running")]
    WorkerGone,

    /// Shutdown requested.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(channel: &'static str, addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind {
            channel,
            addr,
            source,
        }
    }

    /// Creates a persistence error.
    pub fn persist(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }

    /// True if this error means the peer went away or stayed silent.
    pub fn is_disconnect(&self) -> bool {
        use unlook_protocol::ProtocolError;
        match self {
            Self::Io(e) | Self::Protocol(ProtocolError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionAborted
            ),
            Self::Protocol(ProtocolError::IncompleteMessage { .. })
            | Self::Protocol(ProtocolError::Timeout { .. }) => true,
            _ => false,
        }
    }
}
