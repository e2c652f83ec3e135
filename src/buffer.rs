//! Per-connection read accumulation buffer.
//!
//! Bytes read from the stream are appended at the back; decoded frames are
//! consumed from the front by advancing the cursor. `BytesMut::reserve`
//! reclaims the consumed prefix before growing, so a connection that keeps
//! up with its peer reads into the same allocation indefinitely.

use crate::error::ProtocolError;
use crate::protocol::{Protocol, Unpacked};
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default number of bytes requested from the stream per read.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Bytes read but not yet resolved into complete frames.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    chunk: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_READ_CHUNK)
    }
}

impl ReadBuffer {
    /// Create a buffer that requests `chunk` bytes per read.
    pub fn new(chunk: usize) -> Self {
        let chunk = chunk.max(1);
        Self {
            buf: BytesMut::with_capacity(chunk),
            chunk,
        }
    }

    /// Read the next chunk from `reader`, returning the bytes added.
    ///
    /// `Ok(0)` means end of stream. Cancel safe: if the future is dropped
    /// before completion no bytes are lost.
    pub async fn fill<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.buf.reserve(self.chunk);
        reader.read_buf(&mut self.buf).await
    }

    /// Append bytes that arrived by other means.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next packet, advancing past the bytes it used.
    ///
    /// Returns `Ok(None)` when the buffered bytes do not hold a complete
    /// frame yet.
    pub fn decode<P>(&mut self, protocol: &P) -> Result<Option<P::Packet>, ProtocolError>
    where
        P: Protocol + ?Sized,
    {
        match protocol.unpack(&self.buf)? {
            Unpacked::Complete(packet, consumed) => {
                if consumed == 0 || consumed > self.buf.len() {
                    return Err(ProtocolError::InvalidConsumed {
                        consumed,
                        available: self.buf.len(),
                    });
                }
                self.buf.advance(consumed);
                Ok(Some(packet))
            }
            Unpacked::Incomplete => Ok(None),
        }
    }

    /// Number of buffered bytes awaiting a complete frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes the buffer can hold before it has to grow.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}
