//! NOWRECORD reply decoding.

use super::{read_f32, read_i16, read_span, require, DecodeError};

/// Length of a NOWRECORD reply.
pub const LIVE_REPLY_LEN: usize = 0x68;

/// Current readings in the units selected on the console, before any conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveReading {
    pub wind_dir: i16,
    pub in_humidity: i8,
    pub out_humidity: i8,
    pub in_temp: f32,
    pub pressure: f32,
    pub barometer: f32,
    pub out_temp: f32,
    pub dew_point: f32,
    pub wind_chill: f32,
    pub wind_speed: f32,
    pub wind_gust: f32,
    pub rain_rate: f32,
    pub daily_rain: f32,
    pub weekly_rain: f32,
    pub monthly_rain: f32,
    pub yearly_rain: f32,
    pub radiation: f32,
    pub uv_index: i8,
    /// 0x20..0x28: not deciphered.
    pub reserved_head: [u8; 8],
    /// 0x65..0x68: not deciphered.
    pub reserved_tail: [u8; 3],
}

/// Decode a NOWRECORD reply.
///
/// After the header: 8 reserved bytes, wind direction (i16), indoor and outdoor humidity
/// (i8 each), fourteen f32 fields, UV index (i8), 3 reserved bytes.
pub fn decode_live_reading(buf: &[u8]) -> Result<LiveReading, DecodeError> {
    require("live", buf, LIVE_REPLY_LEN)?;

    let float = |n: usize| read_f32(buf, 0x2c + 4 * n);
    Ok(LiveReading {
        wind_dir: read_i16(buf, 0x28),
        in_humidity: buf[0x2a] as i8,
        out_humidity: buf[0x2b] as i8,
        in_temp: float(0),
        pressure: float(1),
        barometer: float(2),
        out_temp: float(3),
        dew_point: float(4),
        wind_chill: float(5),
        wind_speed: float(6),
        wind_gust: float(7),
        rain_rate: float(8),
        daily_rain: float(9),
        weekly_rain: float(10),
        monthly_rain: float(11),
        yearly_rain: float(12),
        radiation: float(13),
        uv_index: buf[0x64] as i8,
        reserved_head: read_span(buf, 0x20),
        reserved_tail: read_span(buf, 0x65),
    })
}
