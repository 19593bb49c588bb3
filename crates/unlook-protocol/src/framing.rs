//! Multipart message framing for the TCP channels.
//!
//! A message is a sequence of one or more parts. Each part is preceded by a
//! 4-byte big-endian header: the low 31 bits hold the part length and the
//! high bit is set when another part of the same message follows.
//!
//! ```text
//! +-----------------------+-------------+-----------------------+-------------+
//! | 1 | len(part 1) (BE)  |   part 1    | 0 | len(part 2) (BE)  |   part 2    |
//! +-----------------------+-------------+-----------------------+-------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::{MAX_CONTROL_PART_SIZE, MAX_STREAM_PART_SIZE};

/// Header bit marking that another part follows.
pub const MORE_FLAG: u32 = 0x8000_0000;

const LENGTH_MASK: u32 = !MORE_FLAG;

/// Size and count limits applied to incoming and outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_part_size: usize,
    pub max_parts: usize,
}

impl FrameLimits {
    /// Limits for the control channel.
    pub const CONTROL: FrameLimits = FrameLimits {
        max_part_size: MAX_CONTROL_PART_SIZE,
        max_parts: 2,
    };

    /// Limits for the frame stream.
    pub const STREAM: FrameLimits = FrameLimits {
        max_part_size: MAX_STREAM_PART_SIZE,
        max_parts: 2,
    };

    fn check(&self, parts: &[Bytes]) -> ProtocolResult<()> {
        if parts.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        if parts.len() > self.max_parts {
            return Err(ProtocolError::TooManyParts {
                count: parts.len(),
                max: self.max_parts,
            });
        }
        for part in parts {
            self.check_part_len(part.len())?;
        }
        Ok(())
    }

    fn check_part_len(&self, len: usize) -> ProtocolResult<()> {
        if len == 0 {
            return Err(ProtocolError::EmptyMessage);
        }
        if len > self.max_part_size {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: self.max_part_size,
            });
        }
        Ok(())
    }
}

fn part_header(len: usize, more: bool) -> [u8; 4] {
    let mut word = (len as u32) & LENGTH_MASK;
    if more {
        word |= MORE_FLAG;
    }
    word.to_be_bytes()
}

/// Encodes all parts of a message into one contiguous buffer.
///
/// Used where the same message goes to many peers, so it is framed once.
pub fn encode_parts(parts: &[Bytes], limits: FrameLimits) -> ProtocolResult<Bytes> {
    limits.check(parts)?;
    let total: usize = parts.iter().map(|p| 4 + p.len()).sum();
    let mut buffer = BytesMut::with_capacity(total);
    for (index, part) in parts.iter().enumerate() {
        buffer.put_slice(&part_header(part.len(), index + 1 < parts.len()));
        buffer.put_slice(part);
    }
    Ok(buffer.freeze())
}

/// Reads multipart messages from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    limits: FrameLimits,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, limits: FrameLimits) -> Self {
        Self { reader, limits }
    }

    /// Reads one complete message.
    ///
    /// Returns `Ok(None)` on a clean end of stream before any part.
    pub async fn read_message(&mut self) -> ProtocolResult<Option<Vec<Bytes>>> {
        let mut parts: Vec<Bytes> = Vec::new();
        loop {
            let mut header = [0u8; 4];
            match self.reader.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if parts.is_empty() {
                        return Ok(None);
                    }
                    return Err(ProtocolError::IncompleteMessage {
                        expected: 4,
                        received: 0,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            let word = u32::from_be_bytes(header);
            let more = word & MORE_FLAG != 0;
            let len = (word & LENGTH_MASK) as usize;
            self.limits.check_part_len(len)?;
            if parts.len() >= self.limits.max_parts {
                return Err(ProtocolError::TooManyParts {
                    count: parts.len() + 1,
                    max: self.limits.max_parts,
                });
            }

            let mut payload = vec![0u8; len];
            self.reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => ProtocolError::IncompleteMessage {
                        expected: len,
                        received: 0,
                    },
                    _ => ProtocolError::Io(e),
                })?;
            parts.push(Bytes::from(payload));

            if !more {
                return Ok(Some(parts));
            }
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes multipart messages to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
    limits: FrameLimits,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, limits: FrameLimits) -> Self {
        Self { writer, limits }
    }

    /// Writes all parts of one message and flushes.
    pub async fn write_message(&mut self, parts: &[Bytes]) -> ProtocolResult<()> {
        self.limits.check(parts)?;
        for (index, part) in parts.iter().enumerate() {
            let header = part_header(part.len(), index + 1 < parts.len());
            self.writer.write_all(&header).await?;
            self.writer.write_all(part).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Writes bytes that were already framed with [`encode_parts`].
    pub async fn write_encoded(&mut self, encoded: &[u8]) -> ProtocolResult<()> {
        self.writer.write_all(encoded).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
