//! EasyWeather - LAN driver for EasyWeather/WH1080-family base stations
//!
//! Discovers the station by UDP broadcast, accepts the station's TCP data connection and
//! turns its binary replies into metric [`sample::Sample`] records: live readings polled on
//! demand and archived history replayed from a resume point.

pub mod archive;
pub mod config;
pub mod live;
pub mod protocol;
pub mod runner;
pub mod sample;
pub mod station;
pub mod units;
