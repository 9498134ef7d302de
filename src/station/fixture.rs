//! A simulated station.
//!
//! Answers the whole protocol from memory: discovery, setup, live readings and the archive.
//! Faults can be queued to exercise the retry paths, and every request is logged. Handles are
//! cheap clones sharing one state, so a test can keep one while the session owns another.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, Timelike};

use super::{CancelToken, Connection, StationError, Transport};
use crate::protocol::{
    datetime_to_ticks, decode_command, encode_command, ArchiveRecord, Command,
    ARCHIVE_INDEX_LEN, ARCHIVE_RECORDS_OFFSET, ARCHIVE_RECORD_LEN, ARCHIVE_SLOTS,
    COMPACT_SETUP_REPLY_LEN, DISCOVERY_PORT, DISCOVERY_REPLY_LEN, HEADER_LEN, LIVE_REPLY_LEN,
    SETUP_REPLY_LEN,
};
use crate::units::{Quantity, UnitProfile};

const STATION_NAME: &str = "HP2000";
const STATION_MAC: &str = "00:0E:C6:00:11:22";

/// Default size of the pieces replies are delivered in.
pub const FIXTURE_CHUNK: usize = 1460;

/// Live values in metric units; the station reports them in its configured units.
const IN_TEMP: f64 = 24.5;
const OUT_TEMP: f64 = 15.9;
const DEW_POINT: f64 = 7.4;
const WIND_CHILL: f64 = 15.8;
const PRESSURE: f64 = 1014.3;
const BAROMETER: f64 = 998.4;
const WIND_SPEED: f64 = 1.5;
const WIND_GUST: f64 = 3.8;
const RADIATION: f64 = 532.7;
const RAIN_PER_POLL: f64 = 0.1;

/// Failures a test can queue. Each fault is consumed by the first operation it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A broadcast gets no answer.
    SilentBroadcast,
    /// A broadcast fails at the socket level.
    NetworkDown,
    /// The station never connects back.
    NoConnection,
    /// A request is accepted but never answered.
    DropReply,
    /// Only the first half of a reply is sent.
    TruncatedReply,
    /// Sending a request fails.
    ConnectionReset,
    /// The reply is sent twice; the copy is left for the next request to trip over.
    DuplicateReply,
}

struct FixtureState {
    profile: UnitProfile,
    compact_setup: bool,
    ip: Ipv4Addr,
    chunk: usize,
    /// Newest year first.
    years: Vec<(u16, Vec<ArchiveRecord>)>,
    polls: u32,
    faults: VecDeque<Fault>,
    requests: Vec<Command>,
}

impl FixtureState {
    fn take_fault(&mut self, applies: &[Fault]) -> Option<Fault> {
        let at = self.faults.iter().position(|f| applies.contains(f))?;
        self.faults.remove(at)
    }

    fn reply(&mut self, command: Command) -> Vec<u8> {
        match command {
            Command::Search => self.discovery_reply(),
            Command::Setup => self.setup_reply(),
            Command::NowRecord => self.live_reply(),
            Command::HistoryIndex => self.index_reply(),
            Command::HistoryData { year, count, start } => self.data_reply(year, count, start),
        }
    }

    fn discovery_reply(&self) -> Vec<u8> {
        let mut buf = vec![0u8; DISCOVERY_REPLY_LEN];
        buf[..HEADER_LEN].copy_from_slice(&reply_header("SEARCH", "")[..HEADER_LEN]);
        put_str(&mut buf[0x28..0x40], STATION_MAC);
        put_str(&mut buf[0x40..0x50], &self.ip.to_string());
        buf
    }

    fn setup_reply(&self) -> Vec<u8> {
        let p = &self.profile;
        let block = [
            0,
            0,
            p.temperature.code(),
            p.pressure.code(),
            p.wind.code(),
            p.rain.code(),
            p.solar.code(),
            0,
            0,
            0,
            0,
            0,
            0,
            1,
            5,
        ];
        let (len, at) = if self.compact_setup {
            (COMPACT_SETUP_REPLY_LEN, 0x28)
        } else {
            (SETUP_REPLY_LEN, 0x30)
        };
        let mut buf = reply_header("WRITE", "SETUP")[..HEADER_LEN].to_vec();
        buf.resize(len, 0);
        buf[at..at + block.len()].copy_from_slice(&block);
        buf
    }

    fn live_reply(&mut self) -> Vec<u8> {
        self.polls += 1;
        let p = self.profile;
        let daily_rain = RAIN_PER_POLL * f64::from(self.polls);
        let fields = [
            p.to_station_units(Quantity::Temperature, IN_TEMP),
            p.to_station_units(Quantity::Pressure, PRESSURE),
            p.to_station_units(Quantity::Pressure, BAROMETER),
            p.to_station_units(Quantity::Temperature, OUT_TEMP),
            p.to_station_units(Quantity::Temperature, DEW_POINT),
            p.to_station_units(Quantity::Temperature, WIND_CHILL),
            p.to_station_units(Quantity::WindSpeed, WIND_SPEED),
            p.to_station_units(Quantity::WindSpeed, WIND_GUST),
            0.0,
            p.to_station_units(Quantity::Rain, daily_rain),
            p.to_station_units(Quantity::Rain, daily_rain),
            p.to_station_units(Quantity::Rain, daily_rain),
            p.to_station_units(Quantity::Rain, daily_rain),
            p.to_station_units(Quantity::Radiation, RADIATION),
        ];

        let mut buf = reply_header("WRITE", "NOWRECORD")[..HEADER_LEN].to_vec();
        buf.resize(LIVE_REPLY_LEN, 0);
        buf[0x28..0x2a].copy_from_slice(&95i16.to_le_bytes());
        buf[0x2a] = 49;
        buf[0x2b] = 71;
        for (n, value) in fields.iter().enumerate() {
            let at = 0x2c + 4 * n;
            buf[at..at + 4].copy_from_slice(&(*value as f32).to_le_bytes());
        }
        buf[0x64] = 3;
        buf
    }

    fn index_reply(&self) -> Vec<u8> {
        let mut buf = reply_header("WRITE", "HISTORY_FILE")[..HEADER_LEN].to_vec();
        buf.resize(ARCHIVE_INDEX_LEN, 0);
        buf[0x20..0x22].copy_from_slice(&(ARCHIVE_INDEX_LEN as u16).to_le_bytes());
        for (n, (year, records)) in self.years.iter().take(ARCHIVE_SLOTS).enumerate() {
            buf[0x28 + 2 * n..0x2a + 2 * n].copy_from_slice(&year.to_le_bytes());
            buf[0x38 + 4 * n..0x3c + 4 * n].copy_from_slice(&(records.len() as u32).to_le_bytes());
        }
        buf
    }

    fn data_reply(&self, year: u16, count: u16, start: u32) -> Vec<u8> {
        let records: &[ArchiveRecord] = self
            .years
            .iter()
            .find(|(y, _)| *y == year)
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[]);
        let from = (start as usize).min(records.len());
        let to = (from + count as usize).min(records.len());

        let mut buf = reply_header("WRITE", "HISTORY_DATA")[..HEADER_LEN].to_vec();
        buf.resize(ARCHIVE_RECORDS_OFFSET, 0);
        for record in &records[from..to] {
            buf.extend_from_slice(&encode_record(record));
        }
        let len = buf.len() as u32;
        buf[0x20..0x24].copy_from_slice(&len.to_le_bytes());
        buf
    }
}

/// Handle to a simulated station; also its [`Transport`].
#[derive(Clone)]
pub struct FixtureStation {
    state: Arc<Mutex<FixtureState>>,
}

impl Default for FixtureStation {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureStation {
    /// A metric station on 127.0.0.1 with an empty archive.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FixtureState {
                profile: UnitProfile::default(),
                compact_setup: false,
                ip: Ipv4Addr::LOCALHOST,
                chunk: FIXTURE_CHUNK,
                years: Vec::new(),
                polls: 0,
                faults: VecDeque::new(),
                requests: Vec::new(),
            })),
        }
    }

    /// A station holding five-minute records for the last `days` days.
    pub fn with_recent_history(days: i64) -> Self {
        let now = Local::now().naive_local();
        let now = now - ChronoDuration::seconds(i64::from(now.second()));
        let first = now - ChronoDuration::days(days);
        let times: Vec<NaiveDateTime> = (0..)
            .map(|i| first + ChronoDuration::minutes(5 * i))
            .take_while(|t| *t <= now)
            .collect();

        let mut station = Self::new();
        for year in first.year()..=now.year() {
            let in_year: Vec<NaiveDateTime> =
                times.iter().copied().filter(|t| t.year() == year).collect();
            if !in_year.is_empty() {
                station = station.with_year(year as u16, in_year);
            }
        }
        station
    }

    fn state(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_profile(self, profile: UnitProfile) -> Self {
        self.state().profile = profile;
        self
    }

    /// Answer SETUP with the 55-byte layout.
    pub fn with_compact_setup(self) -> Self {
        self.state().compact_setup = true;
        self
    }

    pub fn with_ip(self, ip: Ipv4Addr) -> Self {
        self.state().ip = ip;
        self
    }

    /// Deliver replies in pieces of at most `chunk` bytes.
    pub fn with_chunk(self, chunk: usize) -> Self {
        self.state().chunk = chunk.max(1);
        self
    }

    /// Replace the archive of `year` with records at `times` (ascending).
    pub fn with_year(self, year: u16, times: Vec<NaiveDateTime>) -> Self {
        let records = times.into_iter().map(archive_record_at).collect();
        {
            let mut state = self.state();
            state.years.retain(|(y, _)| *y != year);
            state.years.push((year, records));
            state.years.sort_by(|a, b| b.0.cmp(&a.0));
        }
        self
    }

    /// Mark the archive record at `time` as written while the UV and solar sensor was offline.
    pub fn with_sensor_outage(self, time: NaiveDateTime) -> Self {
        {
            let mut state = self.state();
            let record = state
                .years
                .iter_mut()
                .flat_map(|(_, records)| records.iter_mut())
                .find(|r| r.time == time);
            if let Some(record) = record {
                // Observed firmware writes the 2-byte sentinel into the 4-byte UV field.
                record.uv = 32767;
                record.radiation = 2_147_483_647;
            }
        }
        self
    }

    /// Append records to `year`, as the station does while it runs.
    pub fn append_records(&self, year: u16, times: Vec<NaiveDateTime>) {
        let mut state = self.state();
        match state.years.iter_mut().find(|(y, _)| *y == year) {
            Some((_, records)) => records.extend(times.into_iter().map(archive_record_at)),
            None => {
                state
                    .years
                    .push((year, times.into_iter().map(archive_record_at).collect()));
                state.years.sort_by(|a, b| b.0.cmp(&a.0));
            }
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<Command> {
        self.state().requests.clone()
    }

    /// NOWRECORD requests answered so far.
    pub fn live_polls(&self) -> u32 {
        self.state().polls
    }
}

impl Transport for FixtureStation {
    type Conn = FixtureConnection;

    fn broadcast(
        &mut self,
        payload: &[u8],
        _target: SocketAddrV4,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(Vec<u8>, SocketAddr), StationError> {
        cancel.check()?;
        let mut state = self.state();
        let command = decode_command(payload)
            .map_err(|e| StationError::Transport(format!("bad broadcast: {}", e)))?;
        state.requests.push(command);

        match state.take_fault(&[Fault::SilentBroadcast, Fault::NetworkDown]) {
            Some(Fault::NetworkDown) => {
                Err(StationError::Transport("network is unreachable".into()))
            }
            Some(_) => Err(StationError::Timeout(timeout)),
            None => {
                let from = SocketAddr::V4(SocketAddrV4::new(state.ip, DISCOVERY_PORT));
                Ok((state.reply(command), from))
            }
        }
    }

    fn listen_and_accept(
        &mut self,
        _port: u16,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<FixtureConnection, StationError> {
        cancel.check()?;
        let mut state = self.state();
        if state.take_fault(&[Fault::NoConnection]).is_some() {
            return Err(StationError::Timeout(timeout));
        }
        Ok(FixtureConnection {
            state: self.state.clone(),
            peer: IpAddr::V4(state.ip),
            pending: VecDeque::new(),
        })
    }
}

/// Data connection to a [`FixtureStation`].
pub struct FixtureConnection {
    state: Arc<Mutex<FixtureState>>,
    peer: IpAddr,
    pending: VecDeque<u8>,
}

impl Connection for FixtureConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), StationError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let command = match decode_command(bytes) {
            Ok(command) => command,
            // The station ignores what it does not understand.
            Err(_) => return Ok(()),
        };
        state.requests.push(command);

        let faults = [
            Fault::ConnectionReset,
            Fault::DropReply,
            Fault::TruncatedReply,
            Fault::DuplicateReply,
        ];
        let reply = match state.take_fault(&faults) {
            Some(Fault::ConnectionReset) => {
                return Err(StationError::Transport("connection reset by peer".into()))
            }
            Some(Fault::DropReply) => return Ok(()),
            Some(Fault::DuplicateReply) => {
                let reply = state.reply(command);
                reply.iter().chain(reply.iter()).copied().collect()
            }
            Some(_) => {
                let mut reply = state.reply(command);
                reply.truncate(reply.len() / 2);
                reply
            }
            None => state.reply(command),
        };
        self.pending.extend(reply);
        Ok(())
    }

    fn receive(
        &mut self,
        max_bytes: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, StationError> {
        cancel.check()?;
        if self.pending.is_empty() {
            return Err(StationError::Timeout(timeout));
        }
        let chunk = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chunk;
        let n = max_bytes.min(chunk).min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn peer_ip(&self) -> Option<IpAddr> {
        Some(self.peer)
    }
}

fn reply_header(command: &str, argument: &str) -> [u8; 40] {
    encode_command(STATION_NAME, command, argument)
}

fn put_str(field: &mut [u8], value: &str) {
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
}

/// A plausible record at `time`: fixed weather, rain growing 0.1 mm every five minutes since
/// midnight.
fn archive_record_at(time: NaiveDateTime) -> ArchiveRecord {
    let rain_tenths = time.num_seconds_from_midnight() / 300;
    ArchiveRecord {
        ticks: datetime_to_ticks(time),
        time,
        in_temp: 245,
        in_humidity: 49,
        pressure: 10143,
        barometer: 9984,
        out_temp: 159,
        out_humidity: 71,
        dew_point: 74,
        wind_chill: 158,
        heat_index: 0x00ff,
        wind_speed: 15,
        wind_gust: 38,
        wind_dir: 95,
        rain_rate: 0,
        daily_rain: rain_tenths,
        weekly_rain: rain_tenths,
        monthly_rain: rain_tenths,
        yearly_rain: rain_tenths,
        uv: 750,
        radiation: 674_931,
    }
}

fn encode_record(record: &ArchiveRecord) -> [u8; ARCHIVE_RECORD_LEN] {
    let mut buf = [0u8; ARCHIVE_RECORD_LEN];
    buf[0..8].copy_from_slice(&record.ticks.to_le_bytes());
    let shorts = [
        record.in_temp,
        record.in_humidity,
        record.pressure,
        record.barometer,
        record.out_temp,
        record.out_humidity,
        record.dew_point,
        record.wind_chill,
        record.heat_index,
        record.wind_speed,
        record.wind_gust,
        record.wind_dir,
    ];
    for (n, v) in shorts.iter().enumerate() {
        buf[8 + 2 * n..10 + 2 * n].copy_from_slice(&v.to_le_bytes());
    }
    let longs = [
        record.rain_rate,
        record.daily_rain,
        record.weekly_rain,
        record.monthly_rain,
        record.yearly_rain,
        record.uv,
        record.radiation,
    ];
    for (n, v) in longs.iter().enumerate() {
        buf[32 + 4 * n..36 + 4 * n].copy_from_slice(&v.to_le_bytes());
    }
    buf
}
