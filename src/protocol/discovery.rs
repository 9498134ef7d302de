//! SEARCH reply decoding.

use super::{padded_str, read_span, require, DecodeError};

/// Smallest SEARCH reply that carries the IP address field.
pub const DISCOVERY_REPLY_LEN: usize = 0x50;

/// What a station says about itself in answer to a SEARCH broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    /// Station name, e.g. `HP2000`.
    pub name: String,
    /// MAC address as printed by the station.
    pub mac: String,
    /// Dotted IPv4 address as printed by the station.
    pub ip: String,
    /// Bytes 0x10..0x28: not deciphered.
    pub reserved: [u8; 24],
}

/// Decode a SEARCH reply: name at 0x00, MAC at 0x28 (24 bytes), IP at 0x40 (16 bytes).
pub fn decode_discovery_reply(buf: &[u8]) -> Result<DiscoveryReply, DecodeError> {
    require("discovery", buf, DISCOVERY_REPLY_LEN)?;
    Ok(DiscoveryReply {
        name: padded_str(&buf[0x00..0x08]),
        mac: padded_str(&buf[0x28..0x40]),
        ip: padded_str(&buf[0x40..0x50]),
        reserved: read_span(buf, 0x10),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; DISCOVERY_REPLY_LEN];
        buf[0..6].copy_from_slice(b"HP2000");
        buf[8..14].copy_from_slice(b"SEARCH");
        buf[0x18] = 0xaa;
        buf[0x28..0x39].copy_from_slice(b"00:0E:C6:00:11:22");
        buf[0x40..0x4c].copy_from_slice(b"192.168.1.40");
        buf
    }

    #[test]
    fn test_decode_discovery_reply() {
        let reply = decode_discovery_reply(&reply_bytes()).unwrap();
        assert_eq!(reply.name, "HP2000");
        assert_eq!(reply.mac, "00:0E:C6:00:11:22");
        assert_eq!(reply.ip, "192.168.1.40");
        assert_eq!(reply.reserved[0x18 - 0x10], 0xaa);
    }

    #[test]
    fn test_decode_discovery_reply_too_short() {
        let buf = reply_bytes();
        let err = decode_discovery_reply(&buf[..0x4f]).unwrap_err();
        assert!(matches!(err, DecodeError::TooShort { actual: 0x4f, .. }));
    }
}
