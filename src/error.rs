//! Error types shared by connections, servers and protocols.

use std::io;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the framework.
///
/// Errors that end a connection are delivered to the handler with the
/// closed event; accept and dial failures are returned to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Read or write failure on a connection stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Non-temporary failure accepting a new stream.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Failed to open an outbound stream.
    #[error("failed to dial '{addr}': {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The protocol rejected inbound or outbound data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid options, reported before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `serve` was called on a connection that is not in the created state.
    #[error("connection is not idle")]
    NotIdle,

    /// A connection task panicked.
    #[error("connection task panicked")]
    Panicked,
}

/// Errors reported by a [`Protocol`](crate::Protocol) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input is structurally invalid and cannot be resynchronized.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A frame header announced more bytes than the codec accepts.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A packet could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The codec reported consuming zero bytes, or more than it was given.
    #[error("codec consumed {consumed} of {available} buffered bytes")]
    InvalidConsumed { consumed: usize, available: usize },
}

/// Error returned when a packet cannot be queued for sending.
///
/// The rejected packet is handed back so the caller can retry or drop it.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum SendError<T> {
    /// The outbound queue is at capacity.
    #[error("send queue is full")]
    Full(T),
    /// The connection is not running.
    #[error("connection is closed")]
    Closed(T),
}

impl<T> SendError<T> {
    /// Recover the packet that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            SendError::Full(packet) | SendError::Closed(packet) => packet,
        }
    }

    /// True when the failure was caused by back-pressure rather than shutdown.
    pub fn is_full(&self) -> bool {
        matches!(self, SendError::Full(_))
    }
}
