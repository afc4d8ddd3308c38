//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! `report()` swaps the periodic counters to get a consistent snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; never use them for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].swap(0, Ordering::Relaxed))
}

/// Upper bound of the bucket containing the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Readings accepted by any ingest transport (monotonic)
    readings_total: AtomicU64,
    /// Readings since last report (reset on report)
    readings_since_report: AtomicU64,
    /// Readings dropped because the ingest queue was full (monotonic)
    readings_dropped: AtomicU64,
    /// Readings rejected because the sensor is unknown (monotonic)
    readings_unknown_sensor: AtomicU64,
    /// Readings classified above threshold (monotonic)
    readings_above_threshold: AtomicU64,
    /// Dispatches started (monotonic)
    dispatches_total: AtomicU64,
    /// Dispatches that found a route (monotonic)
    routes_found: AtomicU64,
    /// Dispatches where no exit was reachable (monotonic)
    routes_not_found: AtomicU64,
    /// Notifications persisted (monotonic)
    notifications_created: AtomicU64,
    /// Notification writes that failed (monotonic)
    notifications_failed: AtomicU64,
    /// Pushes handed to a live connection (monotonic)
    pushes_delivered: AtomicU64,
    /// Pushes dropped, no live connection (monotonic)
    pushes_missed: AtomicU64,
    /// Currently registered connections (gauge)
    live_connections: AtomicU64,
    /// Dispatch latency histogram (reset on report)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    dispatch_latency_sum_us: AtomicU64,
    dispatch_latency_max_us: AtomicU64,
    dispatches_since_report: AtomicU64,
    /// Last report time (only touched by the reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_total: AtomicU64::new(0),
            readings_since_report: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            readings_unknown_sensor: AtomicU64::new(0),
            readings_above_threshold: AtomicU64::new(0),
            dispatches_total: AtomicU64::new(0),
            routes_found: AtomicU64::new(0),
            routes_not_found: AtomicU64::new(0),
            notifications_created: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            pushes_delivered: AtomicU64::new(0),
            pushes_missed: AtomicU64::new(0),
            live_connections: AtomicU64::new(0),
            dispatch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatch_latency_sum_us: AtomicU64::new(0),
            dispatch_latency_max_us: AtomicU64::new(0),
            dispatches_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_reading(&self) {
        self.readings_total.fetch_add(1, Ordering::Relaxed);
        self.readings_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading_dropped(&self) {
        self.readings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_sensor(&self) {
        self.readings_unknown_sensor.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_above_threshold(&self) {
        self.readings_above_threshold.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch_started(&self) {
        self.dispatches_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_route(&self, found: bool) {
        if found {
            self.routes_found.fetch_add(1, Ordering::Relaxed);
        } else {
            self.routes_not_found.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_notification(&self, created: bool) {
        if created {
            self.notifications_created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_push(&self, delivered: bool) {
        if delivered {
            self.pushes_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pushes_missed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_live_connections(&self, count: usize) {
        self.live_connections.store(count as u64, Ordering::Relaxed);
    }

    /// Record end-to-end dispatch latency (reading to last push)
    #[inline]
    pub fn record_dispatch_latency(&self, latency_us: u64) {
        self.dispatches_since_report.fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.dispatch_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.dispatch_latency_max_us, latency_us);
    }

    pub fn readings_total(&self) -> u64 {
        self.readings_total.load(Ordering::Relaxed)
    }

    pub fn readings_dropped(&self) -> u64 {
        self.readings_dropped.load(Ordering::Relaxed)
    }

    pub fn pushes_delivered(&self) -> u64 {
        self.pushes_delivered.load(Ordering::Relaxed)
    }

    pub fn pushes_missed(&self) -> u64 {
        self.pushes_missed.load(Ordering::Relaxed)
    }

    pub fn notifications_created(&self) -> u64 {
        self.notifications_created.load(Ordering::Relaxed)
    }

    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    pub fn routes_not_found(&self) -> u64 {
        self.routes_not_found.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the periodic ones
    pub fn report(&self) -> MetricsSummary {
        let readings_count = self.readings_since_report.swap(0, Ordering::Relaxed);
        let dispatch_count = self.dispatches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.dispatch_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.dispatch_latency_max_us.swap(0, Ordering::Relaxed);
        let dispatch_lat_buckets = swap_buckets(&self.dispatch_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let readings_per_sec = if elapsed.as_secs_f64() > 0.0 {
            readings_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let readings_total = self.readings_total.load(Ordering::Relaxed);
        let readings_dropped = self.readings_dropped.load(Ordering::Relaxed);
        let reading_drop_ratio = if readings_total + readings_dropped > 0 {
            readings_dropped as f64 / (readings_total + readings_dropped) as f64
        } else {
            0.0
        };

        MetricsSummary {
            readings_total,
            readings_per_sec,
            readings_dropped,
            reading_drop_ratio,
            readings_unknown_sensor: self.readings_unknown_sensor.load(Ordering::Relaxed),
            readings_above_threshold: self.readings_above_threshold.load(Ordering::Relaxed),
            dispatches_total: self.dispatches_total.load(Ordering::Relaxed),
            routes_found: self.routes_found.load(Ordering::Relaxed),
            routes_not_found: self.routes_not_found.load(Ordering::Relaxed),
            notifications_created: self.notifications_created.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            pushes_delivered: self.pushes_delivered.load(Ordering::Relaxed),
            pushes_missed: self.pushes_missed.load(Ordering::Relaxed),
            live_connections: self.live_connections.load(Ordering::Relaxed),
            dispatch_lat_buckets,
            dispatch_lat_avg_us: if dispatch_count > 0 { latency_sum / dispatch_count } else { 0 },
            dispatch_lat_max_us: latency_max,
            dispatch_lat_p50_us: percentile_from_buckets(&dispatch_lat_buckets, 0.50),
            dispatch_lat_p99_us: percentile_from_buckets(&dispatch_lat_buckets, 0.99),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub readings_total: u64,
    pub readings_per_sec: f64,
    pub readings_dropped: u64,
    pub reading_drop_ratio: f64,
    pub readings_unknown_sensor: u64,
    pub readings_above_threshold: u64,
    pub dispatches_total: u64,
    pub routes_found: u64,
    pub routes_not_found: u64,
    pub notifications_created: u64,
    pub notifications_failed: u64,
    pub pushes_delivered: u64,
    pub pushes_missed: u64,
    pub live_connections: u64,
    /// Dispatch latency histogram since last report
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub dispatch_lat_buckets: [u64; NUM_BUCKETS],
    pub dispatch_lat_avg_us: u64,
    pub dispatch_lat_max_us: u64,
    pub dispatch_lat_p50_us: u64,
    pub dispatch_lat_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            readings_total = %self.readings_total,
            readings_per_sec = format!("{:.2}", self.readings_per_sec),
            readings_dropped = %self.readings_dropped,
            above_threshold = %self.readings_above_threshold,
            dispatches = %self.dispatches_total,
            routes_not_found = %self.routes_not_found,
            notifications_failed = %self.notifications_failed,
            pushes_delivered = %self.pushes_delivered,
            pushes_missed = %self.pushes_missed,
            live_connections = %self.live_connections,
            dispatch_p99_us = %self.dispatch_lat_p99_us,
            "metrics"
        );
    }
}
