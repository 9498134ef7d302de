//! One pass over the station archive.

use std::collections::VecDeque;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

use super::first_after;
use crate::protocol::{
    decode_archive_index, decode_archive_records, ArchiveRecord, ArchiveYearIndex, Command,
    ARCHIVE_INDEX_LEN,
};
use crate::sample::{utc_to_local, RainAccumulator, Sample};
use crate::station::{Framing, Station, StationError, Transport};

/// Records requested per round-trip.
pub const ARCHIVE_BATCH: u32 = 100;

#[derive(Debug)]
enum CursorState {
    Start,
    Reading {
        index: ArchiveYearIndex,
        slot: usize,
        next: u32,
    },
    Done,
}

/// Streams archive samples after a resume point, oldest first, across year boundaries.
///
/// A pass only covers the years and counts seen in the index fetched when it started.
/// Any station error ends the pass.
pub struct ArchiveCursor<T: Transport> {
    station: Station<T>,
    since: Option<NaiveDateTime>,
    rain: RainAccumulator,
    batch: u32,
    state: CursorState,
    buffered: VecDeque<Sample>,
    last_time: Option<NaiveDateTime>,
}

impl<T: Transport> ArchiveCursor<T> {
    /// Start after `since`, or at the oldest record when `None`.
    pub fn new(station: Station<T>, since: Option<DateTime<Utc>>) -> Self {
        Self::resume(station, since.map(utc_to_local))
    }

    /// Start after the record stamped `since` (station wall-clock time).
    pub fn resume(station: Station<T>, since: Option<NaiveDateTime>) -> Self {
        Self {
            station,
            since,
            rain: RainAccumulator::new(),
            batch: ARCHIVE_BATCH,
            state: CursorState::Start,
            buffered: VecDeque::new(),
            last_time: None,
        }
    }

    /// Continue rain accounting from an earlier pass.
    pub fn with_rain(mut self, rain: RainAccumulator) -> Self {
        self.rain = rain;
        self
    }

    /// Records per round-trip, between 1 and the 16-bit count a request can carry.
    pub fn with_batch(mut self, batch: u32) -> Self {
        self.batch = batch.clamp(1, u32::from(u16::MAX));
        self
    }

    /// Station time of the last record yielded.
    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.last_time
    }

    pub fn into_rain(self) -> RainAccumulator {
        self.rain
    }

    /// Samples from the next round-trip, or `None` once the pass is over.
    pub fn next_page(&mut self) -> Result<Option<Vec<Sample>>, StationError> {
        match self.advance() {
            Ok(page) => Ok(page),
            Err(err) => {
                self.state = CursorState::Done;
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<Vec<Sample>>, StationError> {
        loop {
            let (year, count, next) = match &mut self.state {
                CursorState::Done => return Ok(None),
                CursorState::Start => {
                    self.state = self.locate()?;
                    continue;
                }
                CursorState::Reading { index, slot, next } => {
                    let year = index.slots[*slot];
                    // The last index of a year is left for the next pass.
                    let end = year.count.saturating_sub(1);
                    if *next >= end {
                        if *slot == 0 {
                            self.state = CursorState::Done;
                        } else {
                            *slot -= 1;
                            *next = 0;
                        }
                        continue;
                    }
                    let count = self.batch.min(end - *next);
                    let start = *next;
                    *next += count;
                    (year.year, count, start)
                }
            };

            let records = self.fetch_page(year, count, next)?;
            tracing::debug!("Archive {} records {}..{}", year, next, next + count);
            let page = records.iter().map(|r| self.to_sample(r)).collect();
            return Ok(Some(page));
        }
    }

    /// Fetch the index and find where this pass starts.
    fn locate(&mut self) -> Result<CursorState, StationError> {
        self.station.connect()?;
        let reply = self.request(Command::HistoryIndex, Framing::AtLeast(ARCHIVE_INDEX_LEN))?;
        let index = decode_archive_index(&reply)?;

        let Some(since) = self.since else {
            return Ok(match index.oldest_used() {
                Some(slot) => {
                    tracing::info!("Archive pass from the start of {}", index.slots[slot].year);
                    CursorState::Reading {
                        index,
                        slot,
                        next: 0,
                    }
                }
                None => CursorState::Done,
            });
        };

        let Some(slot) = index.oldest_at_or_after(since.year()) else {
            tracing::info!("Archive holds nothing after {}", since);
            return Ok(CursorState::Done);
        };
        let year = index.slots[slot];
        let next = first_after(year.count, &since, |i| {
            self.fetch_page(year.year, 1, i)?
                .first()
                .map(|r| r.time)
                .ok_or_else(|| StationError::Transport("empty archive reply".into()))
        })?;
        tracing::info!("Archive pass from {} record {} (after {})", year.year, next, since);

        Ok(CursorState::Reading { index, slot, next })
    }

    fn fetch_page(
        &mut self,
        year: u16,
        count: u32,
        start: u32,
    ) -> Result<Vec<ArchiveRecord>, StationError> {
        let count = u16::try_from(count).map_err(|_| {
            StationError::Transport(format!("archive page of {} records is too large", count))
        })?;
        let command = Command::HistoryData { year, count, start };
        let reply = self.request(command, Framing::LengthPrefixed)?;
        Ok(decode_archive_records(&reply, usize::from(count))?)
    }

    fn request(&mut self, command: Command, framing: Framing) -> Result<Vec<u8>, StationError> {
        self.station
            .exchange(&command.encode(), framing)
            .map_err(|err| match err {
                StationError::Timeout(_) | StationError::Transport(_) => {
                    StationError::RetriesExceeded(format!("archive {:?}: {}", command, err))
                }
                other => other,
            })
    }

    fn to_sample(&mut self, record: &ArchiveRecord) -> Sample {
        let mut sample = Sample::from_archive(record);
        sample.rain = self.rain.observe(sample.daily_rain, record.time);
        self.last_time = Some(record.time);
        sample
    }
}

impl<T: Transport> Iterator for ArchiveCursor<T> {
    type Item = Result<Sample, StationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.buffered.pop_front() {
                return Some(Ok(sample));
            }
            match self.next_page() {
                Ok(Some(page)) => self.buffered.extend(page),
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
