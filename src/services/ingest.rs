//! Reading ingest - device readings in, alerts out
//!
//! `Ingest` records every reading as a measurement and hands above-threshold
//! readings to the alert dispatcher. The HTTP route calls it inline; the MQTT
//! subscriber enqueues readings to an `IngestWorker` via a bounded channel so
//! the network loop never waits on a dispatch.

use crate::domain::route::RouteResult;
use crate::domain::types::{Measurement, SensorReading};
use crate::infra::metrics::Metrics;
use crate::services::directory::{MeasurementLog, SensorDirectory};
use crate::services::dispatch::{AlertDispatcher, DispatchError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// What ingest did with a reading
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    BelowThreshold,
    /// Alert fanned out; carries the route (`None` when no exit is reachable)
    Dispatched(Option<RouteResult>),
}

pub struct Ingest {
    sensors: Arc<dyn SensorDirectory>,
    measurements: Arc<dyn MeasurementLog>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Arc<Metrics>,
}

impl Ingest {
    pub fn new(
        sensors: Arc<dyn SensorDirectory>,
        measurements: Arc<dyn MeasurementLog>,
        dispatcher: Arc<AlertDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sensors, measurements, dispatcher, metrics }
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// Record a reading and dispatch an alert when it crosses the threshold
    ///
    /// A reading is above threshold when the device says so or its value
    /// exceeds the sensor's configured threshold.
    pub async fn ingest_reading(&self, reading: SensorReading) -> Result<IngestOutcome, DispatchError> {
        self.metrics.record_reading();

        let Some(sensor) = self.sensors.sensor(reading.sensor_id).await? else {
            self.metrics.record_unknown_sensor();
            return Err(DispatchError::SensorNotFound(reading.sensor_id));
        };

        // A lost measurement must not hold back the alert
        if let Err(e) = self.measurements.record(Measurement::from_reading(&reading)).await {
            warn!(sensor_id = %reading.sensor_id, error = %e, "measurement_record_failed");
        }

        let above = reading.is_above_threshold || reading.value > sensor.threshold;
        if !above {
            debug!(sensor_id = %sensor.id, value = %reading.value, "reading_below_threshold");
            return Ok(IngestOutcome::BelowThreshold);
        }

        self.metrics.record_above_threshold();
        info!(
            sensor_id = %sensor.id,
            sensor = %sensor.name,
            value = %reading.value,
            threshold = %sensor.threshold,
            device_flag = %reading.is_above_threshold,
            "smoke_threshold_exceeded"
        );

        let reading = SensorReading { is_above_threshold: true, ..reading };
        let route = self.dispatcher.on_threshold_exceeded(&reading).await?;
        Ok(IngestOutcome::Dispatched(route))
    }
}

/// A reading queued for the ingest worker
#[derive(Debug)]
pub struct QueuedReading {
    pub reading: SensorReading,
    /// When the reading was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

impl QueuedReading {
    pub fn new(reading: SensorReading) -> Self {
        Self { reading, enqueued_at: Instant::now() }
    }
}

/// Queue a reading without waiting
///
/// A full queue drops the reading and counts the drop; the error is
/// returned so the caller can decide how loudly to complain.
pub fn try_enqueue(
    tx: &mpsc::Sender<QueuedReading>,
    reading: SensorReading,
    metrics: &Metrics,
) -> Result<(), TrySendError<QueuedReading>> {
    let result = tx.try_send(QueuedReading::new(reading));
    if let Err(TrySendError::Full(_)) = &result {
        metrics.record_reading_dropped();
    }
    result
}

/// Worker that ingests queued readings
///
/// Each reading runs on its own task so a slow dispatch never delays the
/// next reading. At most `max_in_flight` tasks run at once; beyond that the
/// worker stops draining and the queue fills up.
pub struct IngestWorker {
    ingest: Arc<Ingest>,
    rx: mpsc::Receiver<QueuedReading>,
    in_flight: Arc<Semaphore>,
}

impl IngestWorker {
    pub fn new(ingest: Arc<Ingest>, rx: mpsc::Receiver<QueuedReading>, max_in_flight: usize) -> Self {
        Self { ingest, rx, in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))) }
    }

    /// Run the worker, processing readings until the channel closes
    pub async fn run(mut self) {
        info!("ingest_worker_started");

        while let Some(queued) = self.rx.recv().await {
            let queue_delay_us = queued.enqueued_at.elapsed().as_micros() as u64;
            if queue_delay_us > 10_000 {
                warn!(queue_delay_us = %queue_delay_us, "ingest_queue_delay_high");
            }

            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                break;
            };
            let ingest = self.ingest.clone();
            tokio::spawn(async move {
                let sensor_id = queued.reading.sensor_id;
                if let Err(e) = ingest.ingest_reading(queued.reading).await {
                    warn!(sensor_id = %sensor_id, error = %e, "ingest_failed");
                }
                drop(permit);
            });
        }

        info!("ingest_worker_stopped");
    }
}

/// Create an ingest channel and worker
///
/// Returns the sender (for transports) and the worker (to be spawned).
/// `buffer_size` bounds both the queue and the readings in flight.
pub fn create_ingest_worker(
    ingest: Arc<Ingest>,
    buffer_size: usize,
) -> (mpsc::Sender<QueuedReading>, IngestWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (tx, IngestWorker::new(ingest, rx, buffer_size))
}
