//! Periodic liveness pings for a deployed instance.
//!
//! Free-tier hosts put idle services to sleep after ~15 minutes; the first
//! request after that pays a cold start long enough to time out a bill
//! upload. Pinging `GET /` every 10 minutes keeps the instance warm.

use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Default ping interval: 10 minutes.
pub const DEFAULT_INTERVAL_SECS: u64 = 600;

/// Default per-ping timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Result of one ping that got an HTTP response.
#[derive(Debug, Clone, Copy)]
pub struct PingOutcome {
    pub status: u16,
    pub latency: Duration,
}

impl PingOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Send one `GET` to `url`.
pub async fn ping_once(client: &reqwest::Client, url: &str) -> Result<PingOutcome, reqwest::Error> {
    let start = Instant::now();
    let response = client.get(url).send().await?;
    Ok(PingOutcome {
        status: response.status().as_u16(),
        latency: start.elapsed(),
    })
}

/// Ping `url` every `interval` until Ctrl-C.
///
/// Failures are logged and never stop the loop.
pub async fn run(url: &str, interval: Duration, timeout: Duration) -> Result<(), reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    info!("Starting keep-alive monitor for {}", url);
    info!("Ping interval: {}s", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => log_ping(ping_once(&client, url).await),
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping keep-alive monitor");
                return Ok(());
            }
        }
    }
}

fn log_ping(result: Result<PingOutcome, reqwest::Error>) {
    match result {
        Ok(outcome) if outcome.is_ok() => info!(
            "Ping success: status {} | latency {:.3}s",
            outcome.status,
            outcome.latency.as_secs_f64()
        ),
        Ok(outcome) => warn!("Ping warning: status {}", outcome.status),
        Err(e) => error!("Ping failed: {}", e),
    }
}
