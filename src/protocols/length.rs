//! Length-prefixed binary framing.
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| payload (length - 4 bytes)|
//! +----------------+---------------------------+
//! ```
//!
//! The length counts the header itself, so the smallest valid frame is
//! `00 00 00 04` carrying an empty payload.

use crate::error::ProtocolError;
use crate::protocol::{Protocol, Unpacked};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single frame, header included.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024; // 16MB

/// Length-prefixed codec carrying opaque byte payloads.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixed {
    max_frame: usize,
}

impl Default for LengthPrefixed {
    fn default() -> Self {
        Self::new()
    }
}

impl LengthPrefixed {
    /// Codec accepting frames up to [`DEFAULT_MAX_FRAME`].
    pub fn new() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Codec with a custom frame limit (clamped to what the header can encode).
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame: max_frame.clamp(HEADER_LEN, u32::MAX as usize),
        }
    }

    /// Largest frame this codec will produce or accept.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }
}

impl Protocol for LengthPrefixed {
    type Packet = Bytes;

    fn pack_size(&self, packet: &Bytes) -> usize {
        HEADER_LEN + packet.len()
    }

    fn pack_to(&self, packet: &Bytes, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        let size = self.pack_size(packet);
        if size > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame,
            });
        }

        dst.reserve(size);
        dst.put_u32(size as u32);
        dst.extend_from_slice(packet);
        Ok(size)
    }

    fn unpack(&self, src: &[u8]) -> Result<Unpacked<Bytes>, ProtocolError> {
        let Some(header) = src.get(..HEADER_LEN) else {
            return Ok(Unpacked::Incomplete);
        };

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if size < HEADER_LEN {
            return Err(ProtocolError::Malformed(format!(
                "frame length {size} is shorter than its header"
            )));
        }
        if size > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame,
            });
        }
        if src.len() < size {
            return Ok(Unpacked::Incomplete);
        }

        let payload = Bytes::copy_from_slice(&src[HEADER_LEN..size]);
        Ok(Unpacked::Complete(payload, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let codec = LengthPrefixed::new();
        codec.pack(&Bytes::copy_from_slice(payload)).unwrap().to_vec()
    }

    #[test]
    fn test_pack_layout() {
        assert_eq!(frame(b"hello"), b"\x00\x00\x00\x09hello");
        assert_eq!(frame(b""), b"\x00\x00\x00\x04");
    }

    #[test]
    fn test_unpack_complete() {
        let codec = LengthPrefixed::new();
        match codec.unpack(b"\x00\x00\x00\x09hello").unwrap() {
            Unpacked::Complete(payload, consumed) => {
                assert_eq!(&payload[..], b"hello");
                assert_eq!(consumed, 9);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unpack_leaves_trailing_frames() {
        let codec = LengthPrefixed::new();
        let mut input = frame(b"one");
        input.extend_from_slice(&frame(b"two"));

        match codec.unpack(&input).unwrap() {
            Unpacked::Complete(payload, consumed) => {
                assert_eq!(&payload[..], b"one");
                assert_eq!(consumed, 7);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_header_and_body() {
        let codec = LengthPrefixed::new();
        assert_eq!(codec.unpack(b"").unwrap(), Unpacked::Incomplete);
        assert_eq!(codec.unpack(b"\x00\x00").unwrap(), Unpacked::Incomplete);
        assert_eq!(
            codec.unpack(b"\x00\x00\x00\x09hel").unwrap(),
            Unpacked::Incomplete
        );
    }

    #[test]
    fn test_short_length_is_malformed() {
        let codec = LengthPrefixed::new();
        assert!(matches!(
            codec.unpack(b"\x00\x00\x00\x02ab"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_frame_limit() {
        let codec = LengthPrefixed::with_max_frame(8);
        assert_eq!(
            codec.unpack(b"\x00\x00\x00\x09hello"),
            Err(ProtocolError::FrameTooLarge { size: 9, max: 8 })
        );

        let mut dst = BytesMut::new();
        assert_eq!(
            codec.pack_to(&Bytes::from_static(b"hello"), &mut dst),
            Err(ProtocolError::FrameTooLarge { size: 9, max: 8 })
        );
        assert!(dst.is_empty());
    }

    #[test]
    fn test_pack_to_appends() {
        let codec = LengthPrefixed::new();
        let mut dst = BytesMut::from(&b"xx"[..]);
        let written = codec.pack_to(&Bytes::from_static(b"ab"), &mut dst).unwrap();
        assert_eq!(written, 6);
        assert_eq!(&dst[..], b"xx\x00\x00\x00\x06ab");
    }
}
