//! EasyWeather - standalone collector
//!
//! Replays the station archive, then polls live readings, printing one JSON sample per line.

use easyweather::config::DriverConfig;
use easyweather::runner::{self, RunOptions};
use easyweather::station::{
    CancelToken, FixtureStation, LanTransport, SessionManager, Station, StationError, Transport,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging; stdout carries samples only
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("easyweather=info".parse()?))
        .init();

    // Load configuration
    let cfg = DriverConfig::load();
    tracing::info!("Broadcasting discovery on {}", cfg.broadcast_addr);

    if cfg.fixture {
        tracing::info!("Using the simulated station");
        serve(FixtureStation::with_recent_history(1), cfg).await
    } else {
        serve(LanTransport::new(), cfg).await
    }
}

async fn serve<T>(
    transport: T,
    cfg: DriverConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    T: Transport + 'static,
{
    let cancel = CancelToken::new();
    let options = RunOptions::from(&cfg);
    let session = SessionManager::new(transport, cfg.clone(), cfg.retry_policy(), cancel.clone());
    let (mut rx, handle) = runner::spawn(Station::new(session), options);

    let mut interrupted = false;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c(), if !interrupted => {
                result?;
                tracing::info!("Interrupted, shutting down");
                interrupted = true;
                cancel.cancel();
            }
            sample = rx.recv() => match sample {
                Some(sample) => println!("{}", serde_json::to_string(&sample)?),
                None => break,
            },
        }
    }

    match handle.await? {
        Ok(summary) => {
            tracing::info!(
                "Collected {} archived and {} live samples",
                summary.archived,
                summary.live
            );
            Ok(())
        }
        Err(StationError::Cancelled) => Ok(()),
        Err(e) => {
            tracing::error!("Station unavailable: {}", e);
            Err(e.into())
        }
    }
}
