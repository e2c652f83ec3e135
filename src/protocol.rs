//! The wire protocol contract.
//!
//! A [`Protocol`] turns a byte stream into packets and packets back into
//! bytes. The framework never looks inside a packet; it only asks the
//! protocol how to frame it.

use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};

/// Outcome of a successful [`Protocol::unpack`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unpacked<T> {
    /// A full packet was decoded from the front of the buffer, consuming
    /// the given number of bytes.
    Complete(T, usize),
    /// The buffer does not yet hold a full frame. Not an error: the caller
    /// waits for more bytes and tries again.
    Incomplete,
}

/// Converts packets to and from their framed byte representation.
///
/// Implementations are shared by every connection of a server and must be
/// stateless with respect to any single stream.
pub trait Protocol: Send + Sync + 'static {
    /// Application-level message type.
    type Packet: Send + 'static;

    /// Exact number of bytes [`pack_to`](Self::pack_to) will write.
    fn pack_size(&self, packet: &Self::Packet) -> usize;

    /// Serialize `packet` onto the end of `dst`, returning the bytes written.
    fn pack_to(&self, packet: &Self::Packet, dst: &mut BytesMut) -> Result<usize, ProtocolError>;

    /// Serialize `packet` into a standalone buffer.
    fn pack(&self, packet: &Self::Packet) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(self.pack_size(packet));
        self.pack_to(packet, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Attempt to decode one packet from the front of `src`.
    ///
    /// Returns [`Unpacked::Incomplete`] when `src` holds only part of a
    /// frame. Errors are reserved for input that can never become valid;
    /// they terminate the connection.
    fn unpack(&self, src: &[u8]) -> Result<Unpacked<Self::Packet>, ProtocolError>;
}
