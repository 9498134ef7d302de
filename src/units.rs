//! Station unit profile and conversion to the metric (METRICWX) unit system.
//!
//! The console decides what units live readings are sent in. Conversion turns a raw value into
//! Celsius, hPa, m/s, mm or W/m^2, maps sentinel values to `None`, and falls back to the raw
//! value when the unit is one the station should not have reported.

use serde::Serialize;

use crate::protocol::SetupReply;

/// Factor from lux to W/m^2 for sunlight.
pub const LUX_TO_WATTS: f64 = 1.0 / 4.02;

/// Factor from foot-candles to W/m^2.
pub const FOOT_CANDLES_TO_WATTS: f64 = 0.04358;

const INHG_TO_HPA: f64 = 33.863_9;
const MMHG_TO_HPA: f64 = 1.333_22;
const KMH_TO_MS: f64 = 1.0 / 3.6;
const KNOT_TO_MS: f64 = 0.514_444;
const MPH_TO_MS: f64 = 0.447_04;
const FTS_TO_MS: f64 = 0.3048;
const INCH_TO_MM: f64 = 25.4;

/// Lowest raw value that means "no reading" for temperature, pressure and wind fields.
pub const FLOAT_SENTINEL: f64 = 3276.0;

/// Lowest raw value that means "no reading" for cumulative rain.
pub const RAIN_SENTINEL: f64 = 214_748_367.0;

/// Raw solar values above this mean "no reading".
pub const RADIATION_SENTINEL: f64 = 2_147_480.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PressureUnit {
    Hpa,
    InHg,
    MmHg,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindUnit {
    MetersPerSecond,
    KilometersPerHour,
    Knot,
    MilesPerHour,
    Beaufort,
    FeetPerSecond,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RainUnit {
    Millimeter,
    Inch,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolarUnit {
    Lux,
    FootCandle,
    WattsPerSquareMeter,
    Unknown(u8),
}

impl From<u8> for TemperatureUnit {
    fn from(raw: u8) -> Self {
        match raw {
            0 => TemperatureUnit::Celsius,
            1 => TemperatureUnit::Fahrenheit,
            other => TemperatureUnit::Unknown(other),
        }
    }
}

impl From<u8> for PressureUnit {
    fn from(raw: u8) -> Self {
        match raw {
            0 => PressureUnit::Hpa,
            1 => PressureUnit::InHg,
            2 => PressureUnit::MmHg,
            other => PressureUnit::Unknown(other),
        }
    }
}

impl From<u8> for WindUnit {
    fn from(raw: u8) -> Self {
        match raw {
            0 => WindUnit::MetersPerSecond,
            1 => WindUnit::KilometersPerHour,
            2 => WindUnit::Knot,
            3 => WindUnit::MilesPerHour,
            4 => WindUnit::Beaufort,
            5 => WindUnit::FeetPerSecond,
            other => WindUnit::Unknown(other),
        }
    }
}

impl From<u8> for RainUnit {
    fn from(raw: u8) -> Self {
        match raw {
            0 => RainUnit::Millimeter,
            1 => RainUnit::Inch,
            other => RainUnit::Unknown(other),
        }
    }
}

impl From<u8> for SolarUnit {
    fn from(raw: u8) -> Self {
        match raw {
            0 => SolarUnit::Lux,
            1 => SolarUnit::FootCandle,
            2 => SolarUnit::WattsPerSquareMeter,
            other => SolarUnit::Unknown(other),
        }
    }
}

impl TemperatureUnit {
    /// The setup byte for this unit.
    pub fn code(self) -> u8 {
        match self {
            TemperatureUnit::Celsius => 0,
            TemperatureUnit::Fahrenheit => 1,
            TemperatureUnit::Unknown(raw) => raw,
        }
    }
}

impl PressureUnit {
    pub fn code(self) -> u8 {
        match self {
            PressureUnit::Hpa => 0,
            PressureUnit::InHg => 1,
            PressureUnit::MmHg => 2,
            PressureUnit::Unknown(raw) => raw,
        }
    }
}

impl WindUnit {
    pub fn code(self) -> u8 {
        match self {
            WindUnit::MetersPerSecond => 0,
            WindUnit::KilometersPerHour => 1,
            WindUnit::Knot => 2,
            WindUnit::MilesPerHour => 3,
            WindUnit::Beaufort => 4,
            WindUnit::FeetPerSecond => 5,
            WindUnit::Unknown(raw) => raw,
        }
    }
}

impl RainUnit {
    pub fn code(self) -> u8 {
        match self {
            RainUnit::Millimeter => 0,
            RainUnit::Inch => 1,
            RainUnit::Unknown(raw) => raw,
        }
    }
}

impl SolarUnit {
    pub fn code(self) -> u8 {
        match self {
            SolarUnit::Lux => 0,
            SolarUnit::FootCandle => 1,
            SolarUnit::WattsPerSquareMeter => 2,
            SolarUnit::Unknown(raw) => raw,
        }
    }
}

/// Physical quantities whose unit depends on the console settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Pressure,
    WindSpeed,
    Rain,
    Radiation,
}

impl Quantity {
    /// Whether `raw` is the station's "no reading" marker for this quantity.
    pub fn is_sentinel(self, raw: f64) -> bool {
        if !raw.is_finite() {
            return true;
        }
        match self {
            Quantity::Temperature | Quantity::Pressure | Quantity::WindSpeed => {
                raw >= FLOAT_SENTINEL
            }
            Quantity::Rain => raw >= RAIN_SENTINEL,
            Quantity::Radiation => raw > RADIATION_SENTINEL,
        }
    }
}

/// Units the station reports live readings in. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitProfile {
    pub temperature: TemperatureUnit,
    pub pressure: PressureUnit,
    pub wind: WindUnit,
    pub rain: RainUnit,
    pub solar: SolarUnit,
}

impl Default for UnitProfile {
    /// The metric profile.
    fn default() -> Self {
        Self {
            temperature: TemperatureUnit::Celsius,
            pressure: PressureUnit::Hpa,
            wind: WindUnit::MetersPerSecond,
            rain: RainUnit::Millimeter,
            solar: SolarUnit::WattsPerSquareMeter,
        }
    }
}

impl From<&SetupReply> for UnitProfile {
    fn from(setup: &SetupReply) -> Self {
        Self {
            temperature: setup.temperature.into(),
            pressure: setup.pressure.into(),
            wind: setup.wind.into(),
            rain: setup.rain.into(),
            solar: setup.solar.into(),
        }
    }
}

impl UnitProfile {
    /// Convert a raw reading into metric, or `None` for a sentinel.
    ///
    /// Units the profile cannot interpret pass the raw value through unchanged.
    pub fn convert(&self, quantity: Quantity, raw: f64) -> Option<f64> {
        if quantity.is_sentinel(raw) {
            return None;
        }
        let converted = match quantity {
            Quantity::Temperature => match self.temperature {
                TemperatureUnit::Celsius => Some(raw),
                TemperatureUnit::Fahrenheit => Some((raw - 32.0) * 5.0 / 9.0),
                TemperatureUnit::Unknown(_) => None,
            },
            Quantity::Pressure => match self.pressure {
                PressureUnit::Hpa => Some(raw),
                PressureUnit::InHg => Some(raw * INHG_TO_HPA),
                PressureUnit::MmHg => Some(raw * MMHG_TO_HPA),
                PressureUnit::Unknown(_) => None,
            },
            Quantity::WindSpeed => match self.wind {
                WindUnit::MetersPerSecond => Some(raw),
                WindUnit::KilometersPerHour => Some(raw * KMH_TO_MS),
                WindUnit::Knot => Some(raw * KNOT_TO_MS),
                WindUnit::MilesPerHour => Some(raw * MPH_TO_MS),
                WindUnit::Beaufort => Some(beaufort_to_ms(raw)),
                WindUnit::FeetPerSecond => Some(raw * FTS_TO_MS),
                WindUnit::Unknown(_) => None,
            },
            Quantity::Rain => match self.rain {
                RainUnit::Millimeter => Some(raw),
                RainUnit::Inch => Some(raw * INCH_TO_MM),
                RainUnit::Unknown(_) => None,
            },
            Quantity::Radiation => match self.solar {
                SolarUnit::Lux => Some(raw * LUX_TO_WATTS),
                SolarUnit::FootCandle => Some(raw * FOOT_CANDLES_TO_WATTS),
                SolarUnit::WattsPerSquareMeter => Some(raw),
                SolarUnit::Unknown(_) => None,
            },
        };

        match converted {
            Some(value) => Some(value),
            None => {
                tracing::warn!(
                    "No conversion for {:?} in profile {:?}, passing raw value {} through",
                    quantity,
                    self,
                    raw
                );
                Some(raw)
            }
        }
    }

    /// Inverse of [`convert`](Self::convert): express a metric value in this profile's units.
    pub fn to_station_units(&self, quantity: Quantity, metric: f64) -> f64 {
        match quantity {
            Quantity::Temperature => match self.temperature {
                TemperatureUnit::Fahrenheit => metric * 9.0 / 5.0 + 32.0,
                _ => metric,
            },
            Quantity::Pressure => match self.pressure {
                PressureUnit::InHg => metric / INHG_TO_HPA,
                PressureUnit::MmHg => metric / MMHG_TO_HPA,
                _ => metric,
            },
            Quantity::WindSpeed => match self.wind {
                WindUnit::KilometersPerHour => metric / KMH_TO_MS,
                WindUnit::Knot => metric / KNOT_TO_MS,
                WindUnit::MilesPerHour => metric / MPH_TO_MS,
                WindUnit::Beaufort => ms_to_beaufort(metric),
                WindUnit::FeetPerSecond => metric / FTS_TO_MS,
                _ => metric,
            },
            Quantity::Rain => match self.rain {
                RainUnit::Inch => metric / INCH_TO_MM,
                _ => metric,
            },
            Quantity::Radiation => match self.solar {
                SolarUnit::Lux => metric / LUX_TO_WATTS,
                SolarUnit::FootCandle => metric / FOOT_CANDLES_TO_WATTS,
                _ => metric,
            },
        }
    }
}

/// Approximate wind speed for a Beaufort force: v = 0.836 * B^1.5.
pub fn beaufort_to_ms(force: f64) -> f64 {
    0.836 * force.max(0.0).powf(1.5)
}

/// Nearest Beaufort force for a wind speed.
pub fn ms_to_beaufort(speed: f64) -> f64 {
    (speed.max(0.0) / 0.836).powf(2.0 / 3.0).round()
}
