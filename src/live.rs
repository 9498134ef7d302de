//! Live sample polling.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::protocol::{decode_live_reading, Command, LIVE_REPLY_LEN};
use crate::sample::{utc_to_local, RainAccumulator, Sample};
use crate::station::{
    CancelToken, Framing, RetryBudget, RetryPolicy, Station, StationError, Transport,
};

/// Source of the sample timestamp.
pub type Clock = Box<dyn FnMut() -> DateTime<Utc> + Send>;

/// Polls the station for current readings, one sample per step.
///
/// The sequence is infinite. It ends after a fatal error (all retries spent) or when the
/// cancel token fires. A malformed reply is reported and polling carries on.
pub struct LiveSampleProducer<T: Transport> {
    station: Station<T>,
    loop_delay: Option<Duration>,
    clock: Clock,
    rain: RainAccumulator,
    policy: RetryPolicy,
    budget: RetryBudget,
    cancel: CancelToken,
    done: bool,
}

impl<T: Transport> LiveSampleProducer<T> {
    pub fn new(station: Station<T>) -> Self {
        let policy = station.policy();
        let cancel = station.cancel_token();
        Self {
            station,
            loop_delay: None,
            clock: Box::new(Utc::now),
            rain: RainAccumulator::new(),
            policy,
            budget: policy.budget(),
            cancel,
            done: false,
        }
    }

    /// Pause before each poll, the first one included.
    pub fn with_loop_delay(mut self, delay: Option<Duration>) -> Self {
        self.loop_delay = delay;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Poll once, reconnecting and retrying as the policy allows.
    pub fn next_sample(&mut self) -> Result<Sample, StationError> {
        loop {
            let profile = self.station.connect()?;

            if let Some(delay) = self.loop_delay {
                self.cancel.sleep(delay)?;
            }

            let request = Command::NowRecord.encode();
            let err = match self
                .station
                .exchange(&request, Framing::AtLeast(LIVE_REPLY_LEN))
            {
                Ok(reply) => {
                    self.budget = self.policy.budget();
                    let reading = match decode_live_reading(&reply) {
                        Ok(reading) => reading,
                        Err(e) => {
                            self.station.reset();
                            return Err(e.into());
                        }
                    };
                    let now = (self.clock)();
                    let mut sample = Sample::from_live(&reading, &profile, now);
                    sample.rain = self.rain.observe(sample.daily_rain, utc_to_local(now));
                    return Ok(sample);
                }
                Err(err) => err,
            };

            let cooldown = matches!(err, StationError::Transport(_));
            tracing::warn!("Live poll failed: {}", err);
            self.budget = self.budget.absorb(err, "live poll").map_err(|e| match e {
                StationError::Timeout(_) => {
                    StationError::RetriesExceeded(format!("live poll: {}", e))
                }
                other => other,
            })?;
            if cooldown {
                self.cancel.sleep(self.policy.retry_wait)?;
            }
        }
    }
}

impl<T: Transport> Iterator for LiveSampleProducer<T> {
    type Item = Result<Sample, StationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_sample() {
            Ok(sample) => Some(Ok(sample)),
            Err(StationError::Cancelled) => {
                self.done = true;
                None
            }
            Err(err @ StationError::Malformed(_)) => Some(Err(err)),
            Err(err) => {
                tracing::error!("Live polling stopped: {}", err);
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{Fault, FixtureStation, SessionManager};
    use crate::units::{RainUnit, TemperatureUnit, UnitProfile, WindUnit};
    use chrono::TimeZone;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn station(fixture: &FixtureStation) -> Station<FixtureStation> {
        Station::new(SessionManager::new(
            fixture.clone(),
            Ipv4Addr::LOCALHOST,
            RetryPolicy::immediate(),
            CancelToken::new(),
        ))
    }

    /// Starts at noon and advances one minute per reading.
    fn stepping_clock() -> Clock {
        let minutes = Arc::new(AtomicI64::new(0));
        let noon = chrono::Local
            .with_ymd_and_hms(2017, 6, 4, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        Box::new(move || noon + chrono::Duration::minutes(minutes.fetch_add(1, Ordering::SeqCst)))
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-4)
    }

    #[test]
    fn test_live_samples_are_metric() {
        let profile = UnitProfile {
            temperature: TemperatureUnit::Fahrenheit,
            wind: WindUnit::MilesPerHour,
            rain: RainUnit::Inch,
            ..Default::default()
        };
        let fixture = FixtureStation::new().with_profile(profile);
        let mut live = LiveSampleProducer::new(station(&fixture)).with_clock(stepping_clock());

        let first = live.next().unwrap().unwrap();
        assert!(close(first.out_temp, 15.9));
        assert!(close(first.wind_gust, 3.8));
        assert!(close(first.daily_rain, 0.1));
        assert_eq!(first.in_humidity, Some(49.0));
        assert_eq!(first.rain, None);

        let second = live.next().unwrap().unwrap();
        assert!(close(second.rain, 0.1));
        assert_eq!(
            second.date_time - first.date_time,
            chrono::Duration::minutes(1)
        );
    }

    #[test]
    fn test_reconnects_after_dropped_reply() {
        let fixture = FixtureStation::new();
        let mut live = LiveSampleProducer::new(station(&fixture)).with_clock(stepping_clock());
        live.next().unwrap().unwrap();

        fixture.inject(Fault::DropReply);
        let sample = live.next().unwrap().unwrap();
        assert!(close(sample.rain, 0.1));
        assert_eq!(
            fixture.requests(),
            vec![
                Command::Search,
                Command::Setup,
                Command::NowRecord,
                Command::NowRecord,
                Command::Search,
                Command::Setup,
                Command::NowRecord,
            ]
        );
    }

    #[test]
    fn test_stops_after_repeated_failures() {
        let fixture = FixtureStation::new();
        let mut live = LiveSampleProducer::new(station(&fixture));
        live.next().unwrap().unwrap();

        // Every request fails from here on.
        for _ in 0..100 {
            fixture.inject(Fault::ConnectionReset);
        }
        let err = live.next().unwrap().unwrap_err();
        assert!(matches!(err, StationError::RetriesExceeded(_)));
        assert!(live.next().is_none());
    }

    #[test]
    fn test_budget_resets_after_success() {
        let fixture = FixtureStation::new();
        let mut live = LiveSampleProducer::new(station(&fixture));
        for _ in 0..4 {
            fixture.inject(Fault::ConnectionReset);
            fixture.inject(Fault::ConnectionReset);
            assert!(live.next().unwrap().is_ok());
        }
    }

    #[test]
    fn test_delay_precedes_every_poll() {
        let fixture = FixtureStation::new();
        let mut live = LiveSampleProducer::new(station(&fixture))
            .with_loop_delay(Some(Duration::from_millis(50)));

        let started = Instant::now();
        live.next().unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        live.next().unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(fixture.live_polls(), 2);
    }

    #[test]
    fn test_cancel_ends_sequence() {
        let fixture = FixtureStation::new();
        let station = station(&fixture);
        let mut live = LiveSampleProducer::new(station.clone())
            .with_loop_delay(Some(Duration::from_secs(60)));
        let cancel = station.cancel_token();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let started = Instant::now();
        assert!(live.next().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(live.next().is_none());
        assert_eq!(fixture.live_polls(), 0);
        canceller.join().unwrap();
    }
}
