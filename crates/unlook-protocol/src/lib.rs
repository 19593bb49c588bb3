//! Wire protocol for the UnLook scanner.
//!
//! Three channels share one message model:
//!
//! - **Discovery** (UDP): one JSON message per datagram. Clients broadcast
//!   `UNLOOK_DISCOVER`, scanners answer with `UNLOOK_ANNOUNCE`.
//! - **Control** (TCP): single-part JSON commands, each answered by exactly one
//!   `RESPONSE` before the next command is read.
//! - **Stream** (TCP): two-part frames, a JSON [`FrameHeader`] followed by the
//!   encoded image payload.
//!
//! # Example
//!
//! ```rust
//! use unlook_protocol::{Message, decode, encode};
//!
//! let parts = encode(&Message::ping(1.5)).unwrap();
//! assert_eq!(decode(&parts).unwrap(), Message::ping(1.5));
//! ```

mod codec;
mod error;
mod framing;
mod types;

pub use codec::{decode, decode_json, encode, encode_json, is_unknown_kind, malformed_kind};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{FrameLimits, FrameReader, FrameWriter, MORE_FLAG, encode_parts};
pub use types::{
    Announce, Frame, FrameHeader, Message, MessageKind, Response, ResponseStatus, StreamOptions,
};

/// Maximum size of one control channel part (1 MiB).
pub const MAX_CONTROL_PART_SIZE: usize = 1024 * 1024;

/// Maximum size of one stream part (16 MiB).
pub const MAX_STREAM_PART_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of a discovery datagram.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;
