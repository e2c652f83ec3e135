//! Ready-made protocol implementations.
//!
//! - `length`: 4-byte big-endian length prefix followed by a payload
//! - `line`: CRLF-terminated text lines
//!
//! Both are plain [`Protocol`](crate::Protocol) implementations; applications
//! with their own wire format implement the trait directly.

pub mod length;
pub mod line;

pub use length::LengthPrefixed;
pub use line::LineProtocol;
