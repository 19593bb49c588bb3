//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or framing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes do not form a recognised message.
    ///
    /// `kind` holds the type tag when one could be read, so that error
    /// responses can name the request they answer.
    #[error("malformed message: {reason}")]
    Malformed { kind: Option<String>, reason: String },

    /// A message part exceeds the allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A message has more parts than the channel accepts.
    #[error("too many message parts: {count} (max: {max})")]
    TooManyParts { count: usize, max: usize },

    /// Failed to serialize a message to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed in the middle of a message.
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// A zero-length part was received.
    #[error("empty message part")]
    EmptyMessage,

    /// Operation timed out.
    #[error("timeout during {operation}")]
    Timeout { operation: String },
}

impl ProtocolError {
    /// Creates a `Malformed` error without a known type tag.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: None,
            reason: reason.into(),
        }
    }

    /// Creates a `Malformed` error for a message whose tag was read.
    pub fn malformed_kind(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: Some(kind.into()),
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// True for errors describing the message content rather than the
    /// transport. The connection can keep going after these.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}
