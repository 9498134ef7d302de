//! SETUP reply decoding.

use super::{read_span, require, DecodeError};

/// Reply length carrying the full documented layout (block at 0x30..=0x3e).
pub const SETUP_REPLY_LEN: usize = 0x3f;

/// Reply length sent by stations in the field (block at 0x28..=0x36).
pub const COMPACT_SETUP_REPLY_LEN: usize = 0x37;

const SETUP_BLOCK_LEN: usize = 15;
const DOCUMENTED_BLOCK_AT: usize = 0x30;
const COMPACT_BLOCK_AT: usize = 0x28;

/// Raw unit and display settings as configured on the station console.
///
/// Only the five unit bytes are interpreted (see [`crate::units::UnitProfile`]); the rest is
/// decoded for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReply {
    pub time_format: u8,
    pub date_format: u8,
    pub temperature: u8,
    pub pressure: u8,
    pub wind: u8,
    pub rain: u8,
    pub solar: u8,
    pub rain_display: u8,
    pub graph_time: u8,
    pub barometer_mode: u8,
    pub weather_threshold: u8,
    pub storm_threshold: u8,
    pub current_weather: u8,
    pub rain_reset_month: u8,
    pub update_interval: u8,
    /// Bytes between the header and the setting block: not deciphered.
    pub reserved: Vec<u8>,
}

/// Decode a SETUP reply in either the documented or the compact layout.
pub fn decode_setup_reply(buf: &[u8]) -> Result<SetupReply, DecodeError> {
    require("setup", buf, COMPACT_SETUP_REPLY_LEN)?;

    let block_at = if buf.len() >= SETUP_REPLY_LEN {
        DOCUMENTED_BLOCK_AT
    } else {
        COMPACT_BLOCK_AT
    };
    let b: [u8; SETUP_BLOCK_LEN] = read_span(buf, block_at);

    Ok(SetupReply {
        time_format: b[0],
        date_format: b[1],
        temperature: b[2],
        pressure: b[3],
        wind: b[4],
        rain: b[5],
        solar: b[6],
        rain_display: b[7],
        graph_time: b[8],
        barometer_mode: b[9],
        weather_threshold: b[10],
        storm_threshold: b[11],
        current_weather: b[12],
        rain_reset_month: b[13],
        update_interval: b[14],
        reserved: buf[super::HEADER_LEN..block_at].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> [u8; SETUP_BLOCK_LEN] {
        [1, 64, 1, 2, 4, 1, 0, 1, 1, 0, 5, 6, 2, 1, 5]
    }

    #[test]
    fn test_decode_documented_layout() {
        let mut buf = vec![0u8; SETUP_REPLY_LEN];
        buf[0x30..0x3f].copy_from_slice(&block());
        let setup = decode_setup_reply(&buf).unwrap();
        assert_eq!(setup.temperature, 1);
        assert_eq!(setup.pressure, 2);
        assert_eq!(setup.wind, 4);
        assert_eq!(setup.rain, 1);
        assert_eq!(setup.solar, 0);
        assert_eq!(setup.date_format, 64);
        assert_eq!(setup.update_interval, 5);
        assert_eq!(setup.reserved.len(), 16);
    }

    #[test]
    fn test_decode_compact_layout() {
        let mut buf = vec![0u8; COMPACT_SETUP_REPLY_LEN];
        buf[0x28..0x37].copy_from_slice(&block());
        let setup = decode_setup_reply(&buf).unwrap();
        assert_eq!(setup.temperature, 1);
        assert_eq!(setup.pressure, 2);
        assert_eq!(setup.wind, 4);
        assert_eq!(setup.rain_reset_month, 1);
        assert_eq!(setup.reserved.len(), 8);
    }

    #[test]
    fn test_decode_setup_too_short() {
        let buf = vec![0u8; COMPACT_SETUP_REPLY_LEN - 1];
        assert!(matches!(
            decode_setup_reply(&buf),
            Err(DecodeError::TooShort { shape: "setup", .. })
        ));
    }
}
