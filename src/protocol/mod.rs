//! Wire codec for the "easyweather" LAN protocol.
//!
//! Every packet starts with a 32-byte header: an 8-byte sender id, an 8-byte command and a
//! 16-byte argument, all ASCII and null padded. Requests are fixed-size; replies carry their
//! payload at fixed offsets after the header. Multi-byte numbers are little-endian.
//!
//! Nothing in here does I/O or keeps state.

mod archive;
mod command;
mod discovery;
mod live;
mod setup;

pub use archive::*;
pub use command::*;
pub use discovery::*;
pub use live::*;
pub use setup::*;

use thiserror::Error;

/// UDP port the station listens on for SEARCH broadcasts.
pub const DISCOVERY_PORT: u16 = 6000;

/// TCP port the station connects back to once it has answered a broadcast.
pub const DATA_PORT: u16 = 6500;

/// Size of the common packet header.
pub const HEADER_LEN: usize = 32;

/// Decoding errors. Decoders never return partially filled records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{shape} packet too short: need {expected} bytes, got {actual}")]
    TooShort {
        shape: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("archive timestamp out of range: {0} ticks")]
    BadTimestamp(u64),
    #[error("unrecognized request: {command} {argument}")]
    UnknownCommand { command: String, argument: String },
    #[error("reply {command} {argument} does not answer {expected}")]
    UnexpectedReply {
        expected: String,
        command: String,
        argument: String,
    },
}

/// Check that `buf` holds at least `expected` bytes for the named shape.
fn require(shape: &'static str, buf: &[u8], expected: usize) -> Result<(), DecodeError> {
    if buf.len() < expected {
        return Err(DecodeError::TooShort {
            shape,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Decode a null-padded ASCII field, dropping the trailing nulls.
fn padded_str(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// Little-endian readers. Callers have already checked the length with `require`.

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_i16(buf: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_span<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut span = [0u8; N];
    span.copy_from_slice(&buf[at..at + N]);
    span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_str_strips_trailing_nulls() {
        assert_eq!(padded_str(b"HP2000\0\0"), "HP2000");
        assert_eq!(padded_str(b"\0\0\0\0"), "");
        assert_eq!(padded_str(b"ABCDEFGH"), "ABCDEFGH");
    }

    #[test]
    fn test_require_reports_sizes() {
        let err = require("live", &[0u8; 10], 104).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TooShort {
                shape: "live",
                expected: 104,
                actual: 10
            }
        );
        assert!(require("live", &[0u8; 104], 104).is_ok());
    }

    #[test]
    fn test_little_endian_readers() {
        let buf = [0x34, 0x12, 0xff, 0xff, 0x00, 0x00, 0x80, 0x3f];
        assert_eq!(read_u16(&buf, 0), 0x1234);
        assert_eq!(read_i16(&buf, 2), -1);
        assert_eq!(read_f32(&buf, 4), 1.0);
    }
}
