//! HISTORY_FILE and HISTORY_DATA reply decoding.
//!
//! Archive timestamps are 100 ns ticks since 1601-01-01 in station-local wall-clock time.

use chrono::{DateTime, NaiveDateTime};

use super::{read_i16, read_u16, read_u32, read_u64, require, DecodeError};

/// Length of a HISTORY_FILE reply.
pub const ARCHIVE_INDEX_LEN: usize = 0x58;

/// Number of year slots in the archive index.
pub const ARCHIVE_SLOTS: usize = 8;

/// Offset of the first record in a HISTORY_DATA reply.
pub const ARCHIVE_RECORDS_OFFSET: usize = 0x28;

/// Size of one archive record.
pub const ARCHIVE_RECORD_LEN: usize = 60;

/// Seconds between 1601-01-01 and 1970-01-01.
const TICK_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// One slot of the archive index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YearSlot {
    /// Calendar year, 0 when the slot is unused.
    pub year: u16,
    /// Number of records stored for the year, at indices `0..count`.
    pub count: u32,
}

impl YearSlot {
    pub fn is_used(&self) -> bool {
        self.year != 0
    }
}

/// Years held by the station, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveYearIndex {
    pub packet_len: u16,
    pub slots: [YearSlot; ARCHIVE_SLOTS],
    /// 0x22..0x28: not deciphered.
    pub reserved: [u16; 3],
}

impl ArchiveYearIndex {
    /// Slot index of the oldest year with data.
    pub fn oldest_used(&self) -> Option<usize> {
        self.slots.iter().rposition(YearSlot::is_used)
    }

    /// Slot index of the oldest year that is not before `year`.
    pub fn oldest_at_or_after(&self, year: i32) -> Option<usize> {
        self.slots
            .iter()
            .rposition(|slot| slot.is_used() && i32::from(slot.year) >= year)
    }
}

/// Decode a HISTORY_FILE reply.
pub fn decode_archive_index(buf: &[u8]) -> Result<ArchiveYearIndex, DecodeError> {
    require("archive index", buf, ARCHIVE_INDEX_LEN)?;

    let mut slots = [YearSlot::default(); ARCHIVE_SLOTS];
    for (n, slot) in slots.iter_mut().enumerate() {
        slot.year = read_u16(buf, 0x28 + 2 * n);
        slot.count = read_u32(buf, 0x38 + 4 * n);
    }

    Ok(ArchiveYearIndex {
        packet_len: read_u16(buf, 0x20),
        slots,
        reserved: [read_u16(buf, 0x22), read_u16(buf, 0x24), read_u16(buf, 0x26)],
    })
}

/// One archived observation. Metric, mostly scaled by 10; radiation in lux x10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub ticks: u64,
    pub time: NaiveDateTime,
    pub in_temp: i16,
    pub in_humidity: i16,
    pub pressure: i16,
    pub barometer: i16,
    pub out_temp: i16,
    pub out_humidity: i16,
    pub dew_point: i16,
    pub wind_chill: i16,
    /// Probably the heat index; often 0x00ff.
    pub heat_index: i16,
    pub wind_speed: i16,
    pub wind_gust: i16,
    pub wind_dir: i16,
    pub rain_rate: u32,
    pub daily_rain: u32,
    pub weekly_rain: u32,
    pub monthly_rain: u32,
    pub yearly_rain: u32,
    /// uW/cm^2.
    pub uv: u32,
    pub radiation: u32,
}

/// Decode a single 60-byte archive record.
pub fn decode_archive_record(buf: &[u8]) -> Result<ArchiveRecord, DecodeError> {
    require("archive record", buf, ARCHIVE_RECORD_LEN)?;

    let ticks = read_u64(buf, 0);
    let short = |n: usize| read_i16(buf, 8 + 2 * n);
    let long = |n: usize| read_u32(buf, 32 + 4 * n);

    Ok(ArchiveRecord {
        ticks,
        time: ticks_to_datetime(ticks)?,
        in_temp: short(0),
        in_humidity: short(1),
        pressure: short(2),
        barometer: short(3),
        out_temp: short(4),
        out_humidity: short(5),
        dew_point: short(6),
        wind_chill: short(7),
        heat_index: short(8),
        wind_speed: short(9),
        wind_gust: short(10),
        wind_dir: short(11),
        rain_rate: long(0),
        daily_rain: long(1),
        weekly_rain: long(2),
        monthly_rain: long(3),
        yearly_rain: long(4),
        uv: long(5),
        radiation: long(6),
    })
}

/// Total length announced by a HISTORY_DATA reply, once the first 0x24 bytes have arrived.
pub fn archive_reply_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 0x24 {
        return None;
    }
    Some(read_u32(buf, 0x20) as usize)
}

/// Decode the `count` records of a HISTORY_DATA reply.
pub fn decode_archive_records(buf: &[u8], count: usize) -> Result<Vec<ArchiveRecord>, DecodeError> {
    require(
        "archive data",
        buf,
        ARCHIVE_RECORDS_OFFSET + count * ARCHIVE_RECORD_LEN,
    )?;

    buf[ARCHIVE_RECORDS_OFFSET..]
        .chunks_exact(ARCHIVE_RECORD_LEN)
        .take(count)
        .map(decode_archive_record)
        .collect()
}

/// Convert 100 ns ticks since 1601-01-01 into a wall-clock time.
pub fn ticks_to_datetime(ticks: u64) -> Result<NaiveDateTime, DecodeError> {
    let micros = (ticks / 10) as i64 - TICK_EPOCH_OFFSET_SECS * 1_000_000;
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or(DecodeError::BadTimestamp(ticks))
}

/// Inverse of [`ticks_to_datetime`].
pub fn datetime_to_ticks(time: NaiveDateTime) -> u64 {
    let micros = time.and_utc().timestamp_micros() + TICK_EPOCH_OFFSET_SECS * 1_000_000;
    micros.max(0) as u64 * 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_tick_epoch() {
        assert_eq!(ticks_to_datetime(0).unwrap(), at(1601, 1, 1, 0, 0));
        // 1970-01-01 is 116444736000000000 ticks after the epoch.
        assert_eq!(
            ticks_to_datetime(116_444_736_000_000_000).unwrap(),
            at(1970, 1, 1, 0, 0)
        );
        let t = at(2017, 6, 30, 23, 55);
        assert_eq!(ticks_to_datetime(datetime_to_ticks(t)).unwrap(), t);
    }

    #[test]
    fn test_decode_archive_index() {
        let mut buf = vec![0u8; ARCHIVE_INDEX_LEN];
        buf[0x20..0x22].copy_from_slice(&88u16.to_le_bytes());
        buf[0x28..0x2a].copy_from_slice(&2017u16.to_le_bytes());
        buf[0x2a..0x2c].copy_from_slice(&2016u16.to_le_bytes());
        buf[0x38..0x3c].copy_from_slice(&1200u32.to_le_bytes());
        buf[0x3c..0x40].copy_from_slice(&105120u32.to_le_bytes());

        let index = decode_archive_index(&buf).unwrap();
        assert_eq!(index.packet_len, 88);
        assert_eq!(index.slots[0], YearSlot { year: 2017, count: 1200 });
        assert_eq!(index.slots[1], YearSlot { year: 2016, count: 105120 });
        assert!(!index.slots[2].is_used());
        assert_eq!(index.oldest_used(), Some(1));
        assert_eq!(index.oldest_at_or_after(2016), Some(1));
        assert_eq!(index.oldest_at_or_after(2017), Some(0));
        assert_eq!(index.oldest_at_or_after(2015), Some(1));
        assert_eq!(index.oldest_at_or_after(2018), None);
    }

    #[test]
    fn test_decode_archive_record() {
        let mut buf = vec![0u8; ARCHIVE_RECORD_LEN];
        let time = at(2017, 3, 4, 8, 5);
        buf[0..8].copy_from_slice(&datetime_to_ticks(time).to_le_bytes());
        let shorts: [i16; 12] = [173, 45, 10123, 10001, -52, 127, -80, -90, 255, 15, 38, 270];
        for (n, v) in shorts.iter().enumerate() {
            buf[8 + 2 * n..10 + 2 * n].copy_from_slice(&v.to_le_bytes());
        }
        let longs: [u32; 7] = [0, 125, 300, 900, 4000, 750, 2_147_483_647];
        for (n, v) in longs.iter().enumerate() {
            buf[32 + 4 * n..36 + 4 * n].copy_from_slice(&v.to_le_bytes());
        }

        let record = decode_archive_record(&buf).unwrap();
        assert_eq!(record.time, time);
        assert_eq!(record.in_temp, 173);
        assert_eq!(record.out_temp, -52);
        assert_eq!(record.out_humidity, 127);
        assert_eq!(record.heat_index, 255);
        assert_eq!(record.wind_dir, 270);
        assert_eq!(record.daily_rain, 125);
        assert_eq!(record.uv, 750);
        assert_eq!(record.radiation, 2_147_483_647);
    }

    #[test]
    fn test_decode_archive_records_needs_full_page() {
        let buf = vec![0u8; ARCHIVE_RECORDS_OFFSET + 2 * ARCHIVE_RECORD_LEN];
        assert_eq!(decode_archive_records(&buf, 2).unwrap().len(), 2);
        assert!(matches!(
            decode_archive_records(&buf, 3),
            Err(DecodeError::TooShort { shape: "archive data", .. })
        ));
    }

    #[test]
    fn test_archive_reply_len() {
        let mut buf = vec![0u8; 0x24];
        buf[0x20..0x24].copy_from_slice(&6040u32.to_le_bytes());
        assert_eq!(archive_reply_len(&buf), Some(6040));
        assert_eq!(archive_reply_len(&buf[..0x23]), None);
    }
}
