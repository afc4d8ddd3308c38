//! MQTT subscriber for device readings
//!
//! Devices publish to `sensors/<sensor-id>/readings`. Payloads use the same
//! JSON shape as the HTTP ingest route; `SensorId` may be omitted, in which
//! case it is taken from the topic.

use crate::domain::types::{SensorId, SensorReading};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::ingest::{try_enqueue, QueuedReading};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Reading published without a `SensorId` field
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TopicReading {
    value: f64,
    #[serde(default)]
    is_above_threshold: bool,
}

/// Sensor id from a `sensors/<id>/readings` topic
fn sensor_id_from_topic(topic: &str) -> Option<SensorId> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("sensors"), Some(id), Some("readings"), None) => id.parse().ok(),
        _ => None,
    }
}

/// Parse an MQTT payload into a reading
pub fn parse_reading(topic: &str, payload: &[u8]) -> Option<SensorReading> {
    if let Ok(reading) = serde_json::from_slice::<SensorReading>(payload) {
        return Some(reading);
    }
    let partial: TopicReading = serde_json::from_slice(payload).ok()?;
    Some(SensorReading {
        sensor_id: sensor_id_from_topic(topic)?,
        value: partial.value,
        is_above_threshold: partial.is_above_threshold,
    })
}

/// Start the MQTT client and queue readings for the ingest worker
///
/// Readings are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped readings are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    reading_tx: mpsc::Sender<QueuedReading>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingest", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let topic = config.mqtt_topic().to_string();

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_client_started");

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(reading) = parse_reading(&publish.topic, &publish.payload) else {
                            warn!(topic = %publish.topic, bytes = %publish.payload.len(), "mqtt_reading_invalid");
                            continue;
                        };
                        debug!(topic = %publish.topic, sensor_id = %reading.sensor_id, value = %reading.value, "mqtt_reading");

                        match try_enqueue(&reading_tx, reading, &metrics) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!("mqtt_reading_dropped: ingest queue full");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("ingest_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Subscriptions do not survive a clean-session reconnect
                        client.subscribe(topic.as_str(), QoS::AtLeastOnce).await?;
                        info!(topic = %topic, "mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
