//! Async glue for the blocking producers.
//!
//! The station protocol is blocking request/response, so the whole collection run happens on
//! the blocking thread pool and samples cross to async code through a channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::archive::Backfill;
use crate::config::DriverConfig;
use crate::live::LiveSampleProducer;
use crate::sample::Sample;
use crate::station::{Station, StationError, Transport};

/// Samples buffered between the producers and the consumer.
pub const SAMPLE_CHANNEL: usize = 1000;

/// What a collection run does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub backfill: bool,
    pub archive_since: Option<DateTime<Utc>>,
    pub loop_delay: Option<Duration>,
    /// Stop after this many live samples (unbounded when `None`).
    pub live_limit: Option<usize>,
}

impl From<&DriverConfig> for RunOptions {
    fn from(cfg: &DriverConfig) -> Self {
        Self {
            backfill: cfg.backfill,
            archive_since: cfg.archive_since,
            loop_delay: cfg.loop_delay,
            live_limit: None,
        }
    }
}

/// Samples delivered by a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub archived: usize,
    pub live: usize,
}

/// Start a collection run: archive backfill (if enabled), then live polling.
///
/// The run ends when the live limit is reached, the receiver is dropped, the station's cancel
/// token fires, or live polling fails for good. A failed backfill is logged and live polling
/// starts anyway.
pub fn spawn<T>(
    station: Station<T>,
    options: RunOptions,
) -> (
    mpsc::Receiver<Sample>,
    JoinHandle<Result<RunSummary, StationError>>,
)
where
    T: Transport + 'static,
{
    let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL);
    let handle = tokio::task::spawn_blocking(move || run(station, options, tx));
    (rx, handle)
}

fn run<T: Transport>(
    station: Station<T>,
    options: RunOptions,
    tx: mpsc::Sender<Sample>,
) -> Result<RunSummary, StationError> {
    let cancel = station.cancel_token();
    let mut summary = RunSummary::default();

    if options.backfill {
        tracing::info!("Starting archive backfill");
        for result in Backfill::new(station.clone(), options.archive_since) {
            match result {
                Ok(sample) => {
                    if tx.blocking_send(sample).is_err() {
                        tracing::debug!("Sample receiver dropped during backfill");
                        return Ok(summary);
                    }
                    summary.archived += 1;
                }
                Err(e) => tracing::error!("Archive backfill failed: {}", e),
            }
        }
    }

    if cancel.is_cancelled() {
        return Ok(summary);
    }

    tracing::info!("Starting live polling");
    let mut live = LiveSampleProducer::new(station).with_loop_delay(options.loop_delay);
    while options.live_limit.map_or(true, |limit| summary.live < limit) {
        let Some(result) = live.next() else { break };
        match result {
            Ok(sample) => {
                if tx.blocking_send(sample).is_err() {
                    tracing::debug!("Sample receiver dropped during live polling");
                    break;
                }
                summary.live += 1;
            }
            Err(e @ StationError::Malformed(_)) => tracing::warn!("Skipping live reading: {}", e),
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "Run finished: {} archived, {} live samples",
        summary.archived,
        summary.live
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{CancelToken, Fault, FixtureStation, RetryPolicy, SessionManager};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::net::Ipv4Addr;

    fn station(fixture: &FixtureStation) -> Station<FixtureStation> {
        Station::new(SessionManager::new(
            fixture.clone(),
            Ipv4Addr::LOCALHOST,
            RetryPolicy::immediate(),
            CancelToken::new(),
        ))
    }

    fn times(n: i64) -> Vec<NaiveDateTime> {
        let start = NaiveDate::from_ymd_opt(2017, 6, 4)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::minutes(5 * i))
            .collect()
    }

    #[tokio::test]
    async fn test_backfill_then_live() {
        let fixture = FixtureStation::new().with_year(2017, times(20));
        let options = RunOptions {
            backfill: true,
            live_limit: Some(3),
            ..Default::default()
        };
        let (mut rx, handle) = spawn(station(&fixture), options);

        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            samples.push(sample);
        }
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary, RunSummary { archived: 19, live: 3 });
        assert_eq!(samples.len(), 22);
        assert!(samples[..19].iter().all(|s| s.interval == Some(5)));
        assert!(samples[19..].iter().all(|s| s.interval.is_none()));
        assert_eq!(fixture.live_polls(), 3);
    }

    #[tokio::test]
    async fn test_live_only() {
        let fixture = FixtureStation::new().with_year(2017, times(20));
        let options = RunOptions {
            live_limit: Some(2),
            ..Default::default()
        };
        let (mut rx, handle) = spawn(station(&fixture), options);
        while rx.recv().await.is_some() {}

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, RunSummary { archived: 0, live: 2 });
    }

    #[tokio::test]
    async fn test_backfill_failure_falls_through_to_live() {
        let fixture = FixtureStation::new().with_year(2017, times(20));
        // Exhaust the socket-failure budget during discovery of the first backfill request.
        for _ in 0..3 {
            fixture.inject(Fault::NetworkDown);
        }
        let options = RunOptions {
            backfill: true,
            live_limit: Some(1),
            ..Default::default()
        };
        let (mut rx, handle) = spawn(station(&fixture), options);
        while rx.recv().await.is_some() {}

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, RunSummary { archived: 0, live: 1 });
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_run() {
        let fixture = FixtureStation::new();
        let (mut rx, handle) = spawn(station(&fixture), RunOptions::default());
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        drop(rx);

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.live >= 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let fixture = FixtureStation::new();
        let station = station(&fixture);
        let cancel = station.cancel_token();
        let options = RunOptions {
            loop_delay: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let (mut rx, handle) = spawn(station, options);
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.live, 0);
        assert!(rx.recv().await.is_none());
        assert_eq!(fixture.live_polls(), 0);
    }

    #[test]
    fn test_options_from_config() {
        let cfg = DriverConfig {
            backfill: false,
            loop_delay: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let options = RunOptions::from(&cfg);
        assert!(!options.backfill);
        assert_eq!(options.loop_delay, Some(Duration::from_secs(10)));
        assert_eq!(options.live_limit, None);
    }
}
