//! CRLF-delimited text lines.
//!
//! ```text
//! Frame:  <utf-8 text>\r\n
//! Packet: <utf-8 text>
//! ```

use crate::error::ProtocolError;
use crate::protocol::{Protocol, Unpacked};
use bytes::BytesMut;

/// Default upper bound on a line, excluding the terminator.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Line codec producing one `String` per CRLF-terminated line.
#[derive(Debug, Clone, Copy)]
pub struct LineProtocol {
    max_line: usize,
}

impl Default for LineProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl LineProtocol {
    pub fn new() -> Self {
        Self {
            max_line: DEFAULT_MAX_LINE,
        }
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self { max_line }
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }
}

impl Protocol for LineProtocol {
    type Packet = String;

    fn pack_size(&self, packet: &String) -> usize {
        packet.len() + 2
    }

    fn pack_to(&self, packet: &String, dst: &mut BytesMut) -> Result<usize, ProtocolError> {
        if packet.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(ProtocolError::Encode(
                "line contains a line terminator".to_string(),
            ));
        }
        if packet.len() > self.max_line {
            return Err(ProtocolError::FrameTooLarge {
                size: packet.len(),
                max: self.max_line,
            });
        }

        dst.reserve(packet.len() + 2);
        dst.extend_from_slice(packet.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(packet.len() + 2)
    }

    fn unpack(&self, src: &[u8]) -> Result<Unpacked<String>, ProtocolError> {
        let line_end = match find_crlf(src) {
            Some(pos) => pos,
            // Without a terminator the line can only grow; give up once it
            // can no longer fit.
            None if src.len() > self.max_line.saturating_add(1) => {
                return Err(ProtocolError::FrameTooLarge {
                    size: src.len(),
                    max: self.max_line,
                });
            }
            None => return Ok(Unpacked::Incomplete),
        };

        if line_end > self.max_line {
            return Err(ProtocolError::FrameTooLarge {
                size: line_end,
                max: self.max_line,
            });
        }

        let line = std::str::from_utf8(&src[..line_end])
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        Ok(Unpacked::Complete(line.to_string(), line_end + 2))
    }
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}
