//! Smoke sensor simulator
//!
//! Behaves like a room smoke detector: fetches its threshold from the
//! gateway, then periodically posts readings that occasionally spike above
//! it.
//!
//! Usage:
//!   cargo run --bin sensor-sim -- --sensor-id <uuid>
//!   cargo run --bin sensor-sim -- --sensor-id <uuid> --interval-secs 1 --count 20

use clap::Parser;
use rand::Rng;
use safe_escape::domain::types::{SensorId, SensorReading};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Threshold assumed when the gateway does not provide one
const DEFAULT_THRESHOLD: f64 = 50.0;

/// Probability that a reading spikes above the threshold
const SPIKE_PROBABILITY: f64 = 0.01;

#[derive(Parser, Debug)]
#[command(name = "sensor-sim", version, about = "Smoke sensor simulator")]
struct Args {
    /// Sensor to impersonate
    #[arg(long)]
    sensor_id: SensorId,

    /// Gateway HTTP base URL
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,

    /// Seconds between readings
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,

    /// Re-fetch the threshold every N readings (0 = only at start)
    #[arg(long, default_value_t = 0)]
    refresh_every: u64,

    /// Stop after N readings (0 = run forever)
    #[arg(long, default_value_t = 0)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct SensorInfo {
    threshold: Option<f64>,
}

/// One simulated value: usually within `[0, threshold)`, rarely `threshold + [1, 10)`
fn generate_value<R: Rng + ?Sized>(rng: &mut R, threshold: f64) -> f64 {
    if rng.gen_bool(SPIKE_PROBABILITY) {
        threshold + rng.gen_range(1.0..10.0)
    } else if threshold > 0.0 {
        rng.gen_range(0.0..threshold)
    } else {
        0.0
    }
}

fn make_reading(sensor_id: SensorId, value: f64, threshold: f64) -> SensorReading {
    SensorReading { sensor_id, value, is_above_threshold: value > threshold }
}

async fn fetch_threshold(client: &reqwest::Client, server: &str, sensor_id: SensorId) -> f64 {
    let url = format!("{server}/api/sensors/{sensor_id}");
    let response = match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            warn!(status = %resp.status(), "threshold_fetch_failed");
            return DEFAULT_THRESHOLD;
        }
        Err(e) => {
            warn!(error = %e, "threshold_fetch_failed");
            return DEFAULT_THRESHOLD;
        }
    };

    match response.json::<SensorInfo>().await {
        Ok(info) => info.threshold.unwrap_or(DEFAULT_THRESHOLD),
        Err(e) => {
            warn!(error = %e, "threshold_body_invalid");
            DEFAULT_THRESHOLD
        }
    }
}

async fn send_reading(client: &reqwest::Client, server: &str, reading: &SensorReading) {
    let url = format!("{server}/api/measurements/receive");
    match client.post(&url).json(reading).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.text().await.unwrap_or_default();
            if reading.is_above_threshold {
                info!(value = %reading.value, route = %body, "reading_sent_alarm");
            } else {
                info!(value = %reading.value, "reading_sent");
            }
        }
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "reading_rejected");
        }
        Err(e) => {
            warn!(error = %e, "reading_send_failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let server = args.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    let mut threshold = fetch_threshold(&client, &server, args.sensor_id).await;
    info!(sensor_id = %args.sensor_id, threshold = %threshold, server = %server, "sensor_sim_started");

    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let mut sent = 0u64;
    loop {
        interval.tick().await;

        if args.refresh_every > 0 && sent > 0 && sent % args.refresh_every == 0 {
            let fresh = fetch_threshold(&client, &server, args.sensor_id).await;
            if fresh != threshold {
                info!(old = %threshold, new = %fresh, "threshold_updated");
                threshold = fresh;
            }
        }

        let value = generate_value(&mut rand::thread_rng(), threshold);
        let reading = make_reading(args.sensor_id, value, threshold);
        send_reading(&client, &server, &reading).await;

        sent += 1;
        if args.count > 0 && sent >= args.count {
            info!(sent = %sent, "sensor_sim_done");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_values_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let value = generate_value(&mut rng, 40.0);
            assert!((0.0..40.0).contains(&value) || (41.0..50.0).contains(&value));
        }
    }

    #[test]
    fn test_spikes_are_rare() {
        let mut rng = StdRng::seed_from_u64(42);
        let spikes = (0..10_000).filter(|_| generate_value(&mut rng, 50.0) > 50.0).count();
        assert!(spikes > 0 && spikes < 300, "spikes = {spikes}");
    }

    #[test]
    fn test_reading_flag_follows_threshold() {
        let id = SensorId::new_v7();
        assert!(make_reading(id, 50.1, 50.0).is_above_threshold);
        assert!(!make_reading(id, 50.0, 50.0).is_above_threshold);
    }
}
