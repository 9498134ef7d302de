//! Normalized samples handed to the host.
//!
//! Every numeric field is either a finite metric value or `None`. Field names follow the
//! weewx observation names so a host can feed the JSON straight into its archive.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::protocol::{ArchiveRecord, LiveReading};
use crate::units::{Quantity, UnitProfile};

/// weewx unit system ids.
pub mod unit_systems {
    /// Celsius, hPa, m/s, mm.
    pub const METRICWX: i32 = 17;
}

/// Archive records are written every five minutes.
pub const ARCHIVE_INTERVAL_MINUTES: u32 = 5;

const SHORT_SENTINEL: i16 = 32767;
const HUMIDITY_SENTINEL: i16 = 127;
const LONG_SENTINEL: u32 = 2_147_483_647;

/// One observation in METRICWX units (Celsius, hPa, m/s, mm, W/m^2).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    #[serde(rename = "dateTime", with = "chrono::serde::ts_seconds")]
    pub date_time: DateTime<Utc>,
    #[serde(rename = "usUnits")]
    pub us_units: i32,
    /// Minutes covered by the sample; only set for archive records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(rename = "inTemp")]
    pub in_temp: Option<f64>,
    #[serde(rename = "outTemp")]
    pub out_temp: Option<f64>,
    #[serde(rename = "dewpoint")]
    pub dew_point: Option<f64>,
    #[serde(rename = "windchill")]
    pub wind_chill: Option<f64>,
    #[serde(rename = "inHumidity")]
    pub in_humidity: Option<f64>,
    #[serde(rename = "outHumidity")]
    pub out_humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub barometer: Option<f64>,
    #[serde(rename = "windSpeed")]
    pub wind_speed: Option<f64>,
    #[serde(rename = "windGust")]
    pub wind_gust: Option<f64>,
    #[serde(rename = "windDir")]
    pub wind_dir: Option<f64>,
    #[serde(rename = "rainRate")]
    pub rain_rate: Option<f64>,
    /// Cumulative rain since the station's daily reset.
    #[serde(rename = "dayRain")]
    pub daily_rain: Option<f64>,
    /// Rain since the previous sample of the same stream.
    pub rain: Option<f64>,
    pub radiation: Option<f64>,
    #[serde(rename = "UV")]
    pub uv: Option<f64>,
}

impl Sample {
    /// Convert a live reading taken at `at`. `rain` is left unset.
    pub fn from_live(reading: &LiveReading, profile: &UnitProfile, at: DateTime<Utc>) -> Self {
        let convert = |quantity, raw: f32| profile.convert(quantity, f64::from(raw));

        Self {
            date_time: at,
            us_units: unit_systems::METRICWX,
            interval: None,
            in_temp: convert(Quantity::Temperature, reading.in_temp),
            out_temp: convert(Quantity::Temperature, reading.out_temp),
            dew_point: convert(Quantity::Temperature, reading.dew_point),
            wind_chill: convert(Quantity::Temperature, reading.wind_chill),
            in_humidity: humidity(i16::from(reading.in_humidity)),
            out_humidity: humidity(i16::from(reading.out_humidity)),
            pressure: convert(Quantity::Pressure, reading.pressure),
            barometer: convert(Quantity::Pressure, reading.barometer),
            wind_speed: convert(Quantity::WindSpeed, reading.wind_speed),
            wind_gust: convert(Quantity::WindSpeed, reading.wind_gust),
            wind_dir: unscaled(reading.wind_dir),
            rain_rate: convert(Quantity::Rain, reading.rain_rate),
            daily_rain: convert(Quantity::Rain, reading.daily_rain),
            rain: None,
            radiation: convert(Quantity::Radiation, reading.radiation),
            uv: (reading.uv_index >= 0).then(|| f64::from(reading.uv_index)),
        }
    }

    /// Convert an archive record. `rain` is left unset.
    pub fn from_archive(record: &ArchiveRecord) -> Self {
        Self {
            date_time: local_to_utc(record.time),
            us_units: unit_systems::METRICWX,
            interval: Some(ARCHIVE_INTERVAL_MINUTES),
            in_temp: tenths(record.in_temp),
            out_temp: tenths(record.out_temp),
            dew_point: tenths(record.dew_point),
            wind_chill: tenths(record.wind_chill),
            in_humidity: unscaled(record.in_humidity),
            out_humidity: humidity(record.out_humidity),
            pressure: tenths(record.pressure),
            barometer: tenths(record.barometer),
            wind_speed: tenths(record.wind_speed),
            wind_gust: tenths(record.wind_gust),
            wind_dir: unscaled(record.wind_dir),
            rain_rate: long_tenths(record.rain_rate),
            daily_rain: long_tenths(record.daily_rain),
            rain: None,
            // uW/cm^2 to UV index.
            uv: long_value(record.uv).map(|uv| (uv / 250.0).round()),
            // 126.7 lux per W/m^2, and the raw value is lux x10.
            radiation: long_value(record.radiation).map(|lux| lux / 1267.0),
        }
    }
}

fn unscaled(raw: i16) -> Option<f64> {
    (raw != SHORT_SENTINEL).then(|| f64::from(raw))
}

fn tenths(raw: i16) -> Option<f64> {
    unscaled(raw).map(|v| v / 10.0)
}

fn humidity(raw: i16) -> Option<f64> {
    (raw != HUMIDITY_SENTINEL && raw != SHORT_SENTINEL).then(|| f64::from(raw))
}

fn long_value(raw: u32) -> Option<f64> {
    // Some firmware writes the 2-byte sentinel into 4-byte fields.
    (raw != LONG_SENTINEL && raw != SHORT_SENTINEL as u32).then(|| f64::from(raw))
}

fn long_tenths(raw: u32) -> Option<f64> {
    (raw != LONG_SENTINEL).then(|| f64::from(raw) / 10.0)
}

/// Interpret a station wall-clock time in the host's time zone.
pub fn local_to_utc(time: NaiveDateTime) -> DateTime<Utc> {
    match Local.from_local_datetime(&time).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Skipped by a DST change: the station clock did not jump.
        None => time.and_utc(),
    }
}

/// Host wall-clock time for an instant, comparable with archive record times.
pub fn utc_to_local(time: DateTime<Utc>) -> NaiveDateTime {
    time.with_timezone(&Local).naive_local()
}

/// Derives per-interval rain from the station's cumulative daily total.
///
/// Live polling and archive replay each own one; they are never shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RainAccumulator {
    last: Option<(f64, NaiveDateTime)>,
}

impl RainAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline the next observation is compared against.
    pub fn baseline(&self) -> Option<(f64, NaiveDateTime)> {
        self.last
    }

    /// Record a cumulative total (mm) observed at `at` and return the rain since the baseline.
    ///
    /// Without a baseline the result is `None`. A new calendar day, a clock that went
    /// backwards or a total that dropped count as a rollover and yield `0.0`. The baseline
    /// always moves to the new observation; a missing total clears it.
    pub fn observe(&mut self, cumulative: Option<f64>, at: NaiveDateTime) -> Option<f64> {
        let Some(total) = cumulative else {
            self.last = None;
            return None;
        };

        let delta = self.last.map(|(prev, prev_at)| {
            let same_day = at.date() == prev_at.date() && at >= prev_at;
            if same_day && total >= prev {
                total - prev
            } else {
                0.0
            }
        });

        self.last = Some((total, at));
        delta
    }
}
