//! Archive replay.
//!
//! An [`ArchiveCursor`] makes one pass from a resume point to the newest record it knows
//! about. [`Backfill`] repeats passes from the last record seen until a pass finds nothing,
//! picking up records the station wrote while earlier passes ran.

mod cursor;
mod search;

pub use cursor::*;
pub use search::*;

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::sample::{utc_to_local, RainAccumulator, Sample};
use crate::station::{Station, StationError, Transport};

/// Repeated archive passes sharing one rain baseline.
pub struct Backfill<T: Transport> {
    station: Station<T>,
    last: Option<NaiveDateTime>,
    rain: RainAccumulator,
    cursor: Option<ArchiveCursor<T>>,
    buffered: VecDeque<Sample>,
    pass_len: usize,
    passes: u32,
    total: usize,
    done: bool,
}

impl<T: Transport> Backfill<T> {
    pub fn new(station: Station<T>, since: Option<DateTime<Utc>>) -> Self {
        Self {
            station,
            last: since.map(utc_to_local),
            rain: RainAccumulator::new(),
            cursor: None,
            buffered: VecDeque::new(),
            pass_len: 0,
            passes: 0,
            total: 0,
            done: false,
        }
    }

    /// Station time of the newest record yielded so far.
    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.last
    }

    /// Passes completed.
    pub fn passes(&self) -> u32 {
        self.passes
    }

    fn fill(&mut self) -> Result<bool, StationError> {
        loop {
            let cursor = self.cursor.get_or_insert_with(|| {
                let rain = std::mem::take(&mut self.rain);
                ArchiveCursor::resume(self.station.clone(), self.last).with_rain(rain)
            });

            if let Some(page) = cursor.next_page()? {
                self.last = cursor.last_time().or(self.last);
                self.pass_len += page.len();
                self.buffered.extend(page);
                return Ok(true);
            }

            if let Some(finished) = self.cursor.take() {
                self.rain = finished.into_rain();
            }
            self.passes += 1;
            self.total += self.pass_len;
            tracing::info!("Archive pass {} read {} records", self.passes, self.pass_len);
            if self.pass_len == 0 {
                tracing::info!("Backfill complete: {} records", self.total);
                return Ok(false);
            }
            self.pass_len = 0;
        }
    }
}

impl<T: Transport> Iterator for Backfill<T> {
    type Item = Result<Sample, StationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sample) = self.buffered.pop_front() {
                return Some(Ok(sample));
            }
            if self.done {
                return None;
            }
            match self.fill() {
                Ok(true) => continue,
                Ok(false) | Err(StationError::Cancelled) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
