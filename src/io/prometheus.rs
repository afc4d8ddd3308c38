//! Prometheus text exposition
//!
//! Renders gateway metrics in Prometheus text format; served at /metrics by
//! the HTTP API.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_reading_metrics(&mut output, site_id, &summary);
    write_dispatch_metrics(&mut output, site_id, &summary);
    write_delivery_metrics(&mut output, site_id, &summary);

    output
}

fn write_reading_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "safe_escape_readings_total",
        "Sensor readings received",
        MetricType::Counter,
        site,
        summary.readings_total,
    );
    let _ = writeln!(output, "# HELP safe_escape_readings_per_sec Readings received per second");
    let _ = writeln!(output, "# TYPE safe_escape_readings_per_sec gauge");
    let _ = writeln!(
        output,
        "safe_escape_readings_per_sec{{site=\"{site}\"}} {:.2}",
        summary.readings_per_sec
    );
    write_metric(
        output,
        "safe_escape_readings_dropped_total",
        "Readings dropped because the ingest queue was full",
        MetricType::Counter,
        site,
        summary.readings_dropped,
    );
    write_gauge_f64(
        output,
        "safe_escape_reading_drop_ratio",
        "Fraction of readings dropped at ingest",
        site,
        summary.reading_drop_ratio,
    );
    write_metric(
        output,
        "safe_escape_readings_unknown_sensor_total",
        "Readings from sensors missing in the site directory",
        MetricType::Counter,
        site,
        summary.readings_unknown_sensor,
    );
    write_metric(
        output,
        "safe_escape_readings_above_threshold_total",
        "Readings classified above the smoke threshold",
        MetricType::Counter,
        site,
        summary.readings_above_threshold,
    );
}

fn write_dispatch_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "safe_escape_dispatches_total",
        "Alert dispatches started",
        MetricType::Counter,
        site,
        summary.dispatches_total,
    );
    write_metric(
        output,
        "safe_escape_routes_found_total",
        "Dispatches that found an evacuation route",
        MetricType::Counter,
        site,
        summary.routes_found,
    );
    write_metric(
        output,
        "safe_escape_routes_not_found_total",
        "Dispatches with no reachable exit",
        MetricType::Counter,
        site,
        summary.routes_not_found,
    );
    write_histogram(
        output,
        "safe_escape_dispatch_latency_us",
        "Dispatch latency in microseconds",
        site,
        &summary.dispatch_lat_buckets,
        summary.dispatch_lat_avg_us,
    );
    write_metric(
        output,
        "safe_escape_dispatch_latency_max_us",
        "Maximum dispatch latency since last scrape",
        MetricType::Gauge,
        site,
        summary.dispatch_lat_max_us,
    );
}

fn write_delivery_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "safe_escape_notifications_created_total",
        "Notifications persisted",
        MetricType::Counter,
        site,
        summary.notifications_created,
    );
    write_metric(
        output,
        "safe_escape_notifications_failed_total",
        "Notification writes that failed",
        MetricType::Counter,
        site,
        summary.notifications_failed,
    );
    write_metric(
        output,
        "safe_escape_pushes_delivered_total",
        "Route pushes handed to a live connection",
        MetricType::Counter,
        site,
        summary.pushes_delivered,
    );
    write_metric(
        output,
        "safe_escape_pushes_missed_total",
        "Route pushes with no live connection",
        MetricType::Counter,
        site,
        summary.pushes_missed,
    );
    write_metric(
        output,
        "safe_escape_live_connections",
        "Registered push connections",
        MetricType::Gauge,
        site,
        summary.live_connections,
    );
}
